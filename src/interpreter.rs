//! Tree-walking evaluator.
//!
//! Runs a type-checked program starting at `main`. Expression evaluation
//! returns a [`Value`]; statement execution returns a control marker so a
//! `return` unwinds to the nearest call boundary without an exception-like
//! mechanism. Record objects live on a [`Heap`] and are passed around by
//! oid, which is what gives records reference semantics.
//!
//! Calls save the caller's environment id, switch to the global frame, and
//! push a fresh frame for the callee's parameters, so a function body never
//! sees the caller's locals.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::ast::{
    AssignStmt, CallExpr, Decl, Expr, ForStmt, FunDecl, IfStmt, Program, RValue, Stmt, Term,
    TypeDecl,
};
use crate::builtins::Builtin;
use crate::error::{OpalError, OpalResult, Stage};
use crate::symbol_table::SymbolTable;
use crate::token::{Token, TokenKind};

pub mod heap;
pub mod value;

use heap::{Heap, HeapObject};
use value::Value;

/// Control-flow marker for statement execution.
enum ExecFlow {
    Continue,
    Return(Value),
}

pub struct Interpreter<R, W> {
    table: SymbolTable<Value>,
    heap: Heap,
    functions: HashMap<String, FunDecl>,
    types: HashMap<String, TypeDecl>,
    global_env: usize,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Interpreter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            table: SymbolTable::new(),
            heap: Heap::new(),
            functions: HashMap::new(),
            types: HashMap::new(),
            global_env: 0,
            input,
            output,
        }
    }

    /// Executes the program and returns the process exit code: the `int`
    /// returned by `main`, or 0 when `main` falls off the end of its body.
    pub fn run(&mut self, program: &Program) -> OpalResult<i32> {
        self.table.push_frame();
        self.global_env = self.table.environment_id();

        for decl in &program.decls {
            match decl {
                Decl::Fun(f) => {
                    self.functions.insert(f.id.lexeme.clone(), f.clone());
                }
                Decl::Type(t) => {
                    self.types.insert(t.id.lexeme.clone(), t.clone());
                }
            }
        }

        let main = self
            .functions
            .get("main")
            .cloned()
            .ok_or_else(|| OpalError::new(Stage::Runtime, "undefined 'main' function"))?;
        let result = self.call_function(&main, Vec::new())?;
        self.table.pop_frame();

        Ok(match result {
            Value::Int(code) => code as i32,
            _ => 0,
        })
    }

    fn call_function(&mut self, decl: &FunDecl, args: Vec<Value>) -> OpalResult<Value> {
        let caller_env = self.table.environment_id();
        self.table.set_environment_id(self.global_env);
        self.table.push_frame();
        let result = self.run_function_body(decl, args);
        self.table.pop_frame();
        self.table.set_environment_id(caller_env);
        result
    }

    fn run_function_body(&mut self, decl: &FunDecl, args: Vec<Value>) -> OpalResult<Value> {
        for (param, arg) in decl.params.iter().zip(args) {
            self.table.add(param.id.lexeme.clone(), arg);
        }
        match self.exec_stmts(&decl.stmts)? {
            ExecFlow::Return(value) => Ok(value),
            ExecFlow::Continue => Ok(Value::Nil),
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> OpalResult<ExecFlow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                ExecFlow::Continue => {}
                ExecFlow::Return(value) => return Ok(ExecFlow::Return(value)),
            }
        }
        Ok(ExecFlow::Continue)
    }

    /// Runs a statement list in a fresh frame; the frame is popped on every
    /// exit path, including errors and return unwinding.
    fn exec_block(&mut self, stmts: &[Stmt]) -> OpalResult<ExecFlow> {
        self.table.push_frame();
        let result = self.exec_stmts(stmts);
        self.table.pop_frame();
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> OpalResult<ExecFlow> {
        match stmt {
            Stmt::VarDecl(node) => {
                let value = self.eval_expr(&node.expr)?;
                self.table.add(node.id.lexeme.clone(), value);
                Ok(ExecFlow::Continue)
            }
            Stmt::Assign(node) => {
                self.exec_assign(node)?;
                Ok(ExecFlow::Continue)
            }
            Stmt::Return(node) => Ok(ExecFlow::Return(self.eval_expr(&node.expr)?)),
            Stmt::If(node) => self.exec_if(node),
            Stmt::While(node) => {
                while self.eval_guard(&node.expr)? {
                    match self.exec_block(&node.stmts)? {
                        ExecFlow::Continue => {}
                        ExecFlow::Return(value) => return Ok(ExecFlow::Return(value)),
                    }
                }
                Ok(ExecFlow::Continue)
            }
            Stmt::For(node) => {
                self.table.push_frame();
                let result = self.exec_for(node);
                self.table.pop_frame();
                result
            }
            Stmt::Call(node) => {
                self.eval_call(node)?;
                Ok(ExecFlow::Continue)
            }
        }
    }

    fn exec_assign(&mut self, node: &AssignStmt) -> OpalResult<()> {
        if node.lvalue.len() == 1 {
            let name = &node.lvalue[0];
            let value = self.eval_expr(&node.expr)?;
            if !self.table.assign(&name.lexeme, value) {
                return Err(self.error_at(format!("undefined variable '{}'", name.lexeme), name));
            }
            return Ok(());
        }

        // dotted path: resolve the owning object, then write the final field
        let oid = self.resolve_owner(&node.lvalue)?;
        let field = node.lvalue.last().expect("lvalue paths are never empty");
        let value = self.eval_expr(&node.expr)?;
        self.heap.get_mut(oid).set_field(&field.lexeme, value);
        Ok(())
    }

    /// Walks every path component but the last and returns the oid of the
    /// object the final component lives on.
    fn resolve_owner(&mut self, path: &[Token]) -> OpalResult<usize> {
        let first = &path[0];
        let mut value = self
            .table
            .get(&first.lexeme)
            .cloned()
            .ok_or_else(|| self.error_at(format!("undefined variable '{}'", first.lexeme), first))?;
        for (i, field) in path.iter().enumerate().skip(1) {
            let oid = self.expect_object(value, field)?;
            if i == path.len() - 1 {
                return Ok(oid);
            }
            value = self
                .heap
                .get(oid)
                .get_field(&field.lexeme)
                .cloned()
                .expect("field exists on a checked record");
        }
        unreachable!("lvalue paths have at least two components here")
    }

    fn exec_if(&mut self, node: &IfStmt) -> OpalResult<ExecFlow> {
        if self.eval_guard(&node.if_part.expr)? {
            return self.exec_block(&node.if_part.stmts);
        }
        for else_if in &node.else_ifs {
            if self.eval_guard(&else_if.expr)? {
                return self.exec_block(&else_if.stmts);
            }
        }
        if !node.else_stmts.is_empty() {
            return self.exec_block(&node.else_stmts);
        }
        Ok(ExecFlow::Continue)
    }

    fn exec_for(&mut self, node: &ForStmt) -> OpalResult<ExecFlow> {
        // both bounds are evaluated once, before the first iteration
        let start = self.eval_loop_bound(&node.start, &node.var_id)?;
        self.table.add(node.var_id.lexeme.clone(), Value::Int(start));
        let end = self.eval_loop_bound(&node.end, &node.var_id)?;
        for i in start..=end {
            self.table.assign(&node.var_id.lexeme, Value::Int(i));
            match self.exec_block(&node.stmts)? {
                ExecFlow::Continue => {}
                ExecFlow::Return(value) => return Ok(ExecFlow::Return(value)),
            }
        }
        Ok(ExecFlow::Continue)
    }

    fn eval_loop_bound(&mut self, expr: &Expr, var_id: &Token) -> OpalResult<i64> {
        match self.eval_expr(expr)? {
            Value::Int(value) => Ok(value),
            other => Err(self.error_at(
                format!("for loop bound evaluated to {} instead of int", other.type_name()),
                var_id,
            )),
        }
    }

    fn eval_guard(&mut self, expr: &Expr) -> OpalResult<bool> {
        match self.eval_expr(expr)? {
            Value::Bool(value) => Ok(value),
            other => Err(OpalError::new(
                Stage::Runtime,
                format!("condition evaluated to {} instead of bool", other.type_name()),
            )),
        }
    }

    fn eval_expr(&mut self, node: &Expr) -> OpalResult<Value> {
        let mut value = self.eval_term(&node.first)?;
        if let (Some(op), Some(rest)) = (&node.op, &node.rest) {
            let rhs = self.eval_expr(rest)?;
            value = self.apply_binary(op, value, rhs)?;
        }
        if node.negated {
            value = match value {
                Value::Bool(b) => Value::Bool(!b),
                other => {
                    return Err(OpalError::new(
                        Stage::Runtime,
                        format!("cannot apply 'not' to {}", other.type_name()),
                    ));
                }
            };
        }
        Ok(value)
    }

    fn eval_term(&mut self, term: &Term) -> OpalResult<Value> {
        match term {
            Term::Simple(rvalue) => self.eval_rvalue(rvalue),
            Term::Complex(expr) => self.eval_expr(expr),
        }
    }

    fn eval_rvalue(&mut self, rvalue: &RValue) -> OpalResult<Value> {
        match rvalue {
            RValue::Simple(token) => self.eval_literal(token),
            RValue::New(type_id) => self.eval_new(type_id),
            RValue::Call(call) => self.eval_call(call),
            RValue::Path(path) => self.eval_path(path),
            RValue::Negated(expr) => match self.eval_expr(expr)? {
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::Double(d) => Ok(Value::Double(-d)),
                other => Err(OpalError::new(
                    Stage::Runtime,
                    format!("cannot negate {}", other.type_name()),
                )),
            },
        }
    }

    fn eval_literal(&self, token: &Token) -> OpalResult<Value> {
        match token.kind {
            TokenKind::IntVal => token
                .lexeme
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.error_at("int literal out of range", token)),
            TokenKind::DoubleVal => token
                .lexeme
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| self.error_at("double literal out of range", token)),
            TokenKind::BoolVal => Ok(Value::Bool(token.lexeme == "true")),
            TokenKind::CharVal => {
                let c = token
                    .lexeme
                    .chars()
                    .next()
                    .expect("char literal carries one character");
                Ok(Value::Char(c))
            }
            TokenKind::StringVal => Ok(Value::String(token.lexeme.clone())),
            TokenKind::Nil => Ok(Value::Nil),
            _ => unreachable!("simple rvalue carries a literal token"),
        }
    }

    fn eval_new(&mut self, type_id: &Token) -> OpalResult<Value> {
        let decl = self
            .types
            .get(&type_id.lexeme)
            .cloned()
            .ok_or_else(|| self.error_at(format!("unknown type '{}'", type_id.lexeme), type_id))?;
        let oid = self.heap.alloc();
        self.table.push_frame();
        let object = self.init_fields(&decl);
        self.table.pop_frame();
        self.heap.put(oid, object?);
        Ok(Value::Oid(oid))
    }

    /// Field initializers run in declaration order; each initialized field
    /// is also bound as a local so later initializers can read it.
    fn init_fields(&mut self, decl: &TypeDecl) -> OpalResult<HeapObject> {
        let mut object = HeapObject::default();
        for vdecl in &decl.vdecls {
            let value = self.eval_expr(&vdecl.expr)?;
            self.table.add(vdecl.id.lexeme.clone(), value.clone());
            object.set_field(&vdecl.id.lexeme, value);
        }
        Ok(object)
    }

    fn eval_path(&mut self, path: &[Token]) -> OpalResult<Value> {
        let first = &path[0];
        let mut value = self
            .table
            .get(&first.lexeme)
            .cloned()
            .ok_or_else(|| self.error_at(format!("undefined variable '{}'", first.lexeme), first))?;
        for field in &path[1..] {
            let oid = self.expect_object(value, field)?;
            value = self
                .heap
                .get(oid)
                .get_field(&field.lexeme)
                .cloned()
                .expect("field exists on a checked record");
        }
        Ok(value)
    }

    fn expect_object(&self, value: Value, component: &Token) -> OpalResult<usize> {
        match value {
            Value::Oid(oid) => Ok(oid),
            Value::Nil => Err(self.error_at(
                format!("cannot access field '{}' through nil", component.lexeme),
                component,
            )),
            other => Err(self.error_at(
                format!("{} value has no fields", other.type_name()),
                component,
            )),
        }
    }

    fn eval_call(&mut self, node: &CallExpr) -> OpalResult<Value> {
        if let Some(builtin) = Builtin::from_name(&node.function_id.lexeme) {
            return self.eval_builtin(builtin, node);
        }

        let decl = self
            .functions
            .get(&node.function_id.lexeme)
            .cloned()
            .ok_or_else(|| {
                self.error_at(
                    format!("undefined function '{}'", node.function_id.lexeme),
                    &node.function_id,
                )
            })?;
        // arguments are evaluated in the caller's environment, in order
        let mut args = Vec::with_capacity(node.args.len());
        for arg in &node.args {
            args.push(self.eval_expr(arg)?);
        }
        self.call_function(&decl, args)
    }

    fn eval_builtin(&mut self, builtin: Builtin, node: &CallExpr) -> OpalResult<Value> {
        let mut args = Vec::with_capacity(node.args.len());
        for arg in &node.args {
            args.push(self.eval_expr(arg)?);
        }
        let id = &node.function_id;

        match builtin {
            Builtin::Print => {
                let text = unescape(&args[0].to_output());
                write!(self.output, "{text}")
                    .map_err(|e| OpalError::new(Stage::Runtime, format!("write failed: {e}")))?;
                Ok(Value::Nil)
            }
            Builtin::Read => {
                let word = self
                    .read_word()
                    .map_err(|e| OpalError::new(Stage::Runtime, format!("read failed: {e}")))?;
                Ok(Value::String(word))
            }
            Builtin::Stoi => {
                let text = self.string_arg(&args[0], builtin, id)?;
                text.parse::<i64>().map(Value::Int).map_err(|_| {
                    self.error_at(format!("stoi: cannot parse '{text}' as an int"), id)
                })
            }
            Builtin::Stod => {
                let text = self.string_arg(&args[0], builtin, id)?;
                text.parse::<f64>().map(Value::Double).map_err(|_| {
                    self.error_at(format!("stod: cannot parse '{text}' as a double"), id)
                })
            }
            Builtin::Itos => match &args[0] {
                Value::Int(n) => Ok(Value::String(n.to_string())),
                other => Err(self.builtin_arg_error(builtin, "int", other, id)),
            },
            Builtin::Dtos => match &args[0] {
                Value::Double(d) => Ok(Value::String(d.to_string())),
                other => Err(self.builtin_arg_error(builtin, "double", other, id)),
            },
            Builtin::Length => {
                let text = self.string_arg(&args[0], builtin, id)?;
                Ok(Value::Int(text.chars().count() as i64))
            }
            Builtin::Get => {
                let index = match &args[0] {
                    Value::Int(n) => *n,
                    other => return Err(self.builtin_arg_error(builtin, "int", other, id)),
                };
                let text = self.string_arg(&args[1], builtin, id)?;
                if text.is_empty() {
                    return Err(self.error_at("get: string is empty", id));
                }
                if index < 0 {
                    return Err(self.error_at(format!("get: index {index} out of range"), id));
                }
                text.chars()
                    .nth(index as usize)
                    .map(Value::Char)
                    .ok_or_else(|| self.error_at(format!("get: index {index} out of range"), id))
            }
        }
    }

    fn string_arg(&self, value: &Value, builtin: Builtin, id: &Token) -> OpalResult<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.builtin_arg_error(builtin, "string", other, id)),
        }
    }

    fn builtin_arg_error(
        &self,
        builtin: Builtin,
        expected: &str,
        got: &Value,
        id: &Token,
    ) -> OpalError {
        self.error_at(
            format!(
                "{}: expected a {expected} argument, got {}",
                builtin.name(),
                got.type_name()
            ),
            id,
        )
    }

    /// Reads one whitespace-delimited token from the input stream, skipping
    /// leading whitespace. The delimiter is left unconsumed.
    fn read_word(&mut self) -> std::io::Result<String> {
        let mut word = String::new();
        loop {
            let available = self.input.fill_buf()?;
            if available.is_empty() {
                break;
            }
            let mut used = 0;
            let mut done = false;
            for &byte in available {
                if byte.is_ascii_whitespace() {
                    if word.is_empty() {
                        used += 1;
                        continue;
                    }
                    done = true;
                    break;
                }
                word.push(byte as char);
                used += 1;
            }
            self.input.consume(used);
            if done {
                break;
            }
        }
        Ok(word)
    }

    fn apply_binary(&mut self, op: &Token, lhs: Value, rhs: Value) -> OpalResult<Value> {
        match op.kind {
            TokenKind::Plus | TokenKind::Minus | TokenKind::Multiply | TokenKind::Divide => {
                self.arithmetic(op, lhs, rhs)
            }
            TokenKind::Modulo => match (lhs, rhs) {
                (Value::Int(_), Value::Int(0)) => Err(self.error_at("modulo by zero", op)),
                (Value::Int(l), Value::Int(r)) => Ok(Value::Int(l.wrapping_rem(r))),
                (lhs, rhs) => Err(self.binary_op_error(op, &lhs, &rhs)),
            },
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => match compare(op.kind, &lhs, &rhs) {
                Some(result) => Ok(Value::Bool(result)),
                None => Err(self.binary_op_error(op, &lhs, &rhs)),
            },
            TokenKind::Equal | TokenKind::NotEqual => {
                let equal = match (&lhs, &rhs) {
                    (Value::Nil, Value::Nil) => true,
                    (Value::Nil, _) | (_, Value::Nil) => false,
                    (Value::Bool(l), Value::Bool(r)) => l == r,
                    (Value::Int(l), Value::Int(r)) => l == r,
                    (Value::Double(l), Value::Double(r)) => l == r,
                    (Value::Char(l), Value::Char(r)) => l == r,
                    (Value::String(l), Value::String(r)) => l == r,
                    (Value::Oid(l), Value::Oid(r)) => l == r,
                    _ => return Err(self.binary_op_error(op, &lhs, &rhs)),
                };
                Ok(Value::Bool(if op.kind == TokenKind::Equal {
                    equal
                } else {
                    !equal
                }))
            }
            TokenKind::And | TokenKind::Or => match (lhs, rhs) {
                (Value::Bool(l), Value::Bool(r)) => Ok(Value::Bool(
                    if op.kind == TokenKind::And { l && r } else { l || r },
                )),
                (lhs, rhs) => Err(self.binary_op_error(op, &lhs, &rhs)),
            },
            _ => Err(self.error_at(format!("'{}' is not a binary operator", op.lexeme), op)),
        }
    }

    fn arithmetic(&mut self, op: &Token, lhs: Value, rhs: Value) -> OpalResult<Value> {
        match (op.kind, lhs, rhs) {
            (_, Value::Int(l), Value::Int(r)) => self.int_arithmetic(op, l, r),
            (_, Value::Double(l), Value::Double(r)) => Ok(Value::Double(match op.kind {
                TokenKind::Plus => l + r,
                TokenKind::Minus => l - r,
                TokenKind::Multiply => l * r,
                _ => l / r,
            })),
            (TokenKind::Plus, lhs, rhs) => self.concat(op, lhs, rhs),
            (_, lhs, rhs) => Err(self.binary_op_error(op, &lhs, &rhs)),
        }
    }

    fn int_arithmetic(&self, op: &Token, l: i64, r: i64) -> OpalResult<Value> {
        let result = match op.kind {
            TokenKind::Plus => l.checked_add(r),
            TokenKind::Minus => l.checked_sub(r),
            TokenKind::Multiply => l.checked_mul(r),
            _ => {
                if r == 0 {
                    return Err(self.error_at("division by zero", op));
                }
                Some(l.wrapping_div(r))
            }
        };
        result
            .map(Value::Int)
            .ok_or_else(|| self.error_at("integer overflow", op))
    }

    fn concat(&self, op: &Token, lhs: Value, rhs: Value) -> OpalResult<Value> {
        let text = match (&lhs, &rhs) {
            (Value::Char(l), Value::Char(r)) => format!("{l}{r}"),
            (Value::Char(l), Value::String(r)) => format!("{l}{r}"),
            (Value::String(l), Value::Char(r)) => format!("{l}{r}"),
            (Value::String(l), Value::String(r)) => format!("{l}{r}"),
            _ => return Err(self.binary_op_error(op, &lhs, &rhs)),
        };
        Ok(Value::String(text))
    }

    fn binary_op_error(&self, op: &Token, lhs: &Value, rhs: &Value) -> OpalError {
        self.error_at(
            format!(
                "cannot apply '{}' to {} and {}",
                op.lexeme,
                lhs.type_name(),
                rhs.type_name()
            ),
            op,
        )
    }

    fn error_at(&self, message: impl Into<String>, token: &Token) -> OpalError {
        OpalError::at_token(Stage::Runtime, message, token)
    }
}

fn compare(op: TokenKind, lhs: &Value, rhs: &Value) -> Option<bool> {
    fn apply<T: PartialOrd + ?Sized>(op: TokenKind, l: &T, r: &T) -> bool {
        match op {
            TokenKind::Less => l < r,
            TokenKind::LessEqual => l <= r,
            TokenKind::Greater => l > r,
            _ => l >= r,
        }
    }
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => Some(apply(op, l, r)),
        (Value::Double(l), Value::Double(r)) => Some(apply(op, l, r)),
        (Value::Char(l), Value::Char(r)) => Some(apply(op, l, r)),
        (Value::String(l), Value::String(r)) => Some(apply(op, l, r)),
        // false orders before true
        (Value::Bool(l), Value::Bool(r)) => Some(apply(op, l, r)),
        _ => None,
    }
}

/// `print` expands the two-character sequences `\n` and `\t`.
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}
