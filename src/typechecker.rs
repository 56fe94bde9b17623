//! Static checker. Walks the AST once, in source order, maintaining a frame
//! stack of typing info. Checking is terminal: the first violation aborts
//! with a `SEMANTIC` error and the interpreter never runs.
//!
//! Names are checked strictly in declaration order, so a call type-checks
//! only when the callee appears earlier in the file (built-ins are seeded
//! first and are always visible).

use crate::ast::{
    AssignStmt, CallExpr, Decl, Expr, ForStmt, FunDecl, IfStmt, Program, RValue, ReturnStmt,
    Stmt, Term, TypeDecl, VarDeclStmt, WhileStmt,
};
use crate::builtins::Builtin;
use crate::error::{OpalError, OpalResult, Stage};
use crate::symbol_table::SymbolTable;
use crate::token::{Token, TokenKind};

/// What a name denotes while checking.
#[derive(Debug, Clone, PartialEq)]
enum SymbolInfo {
    /// A variable and its type name.
    Variable(String),
    /// A function signature: parameter type names, then the return type.
    Function(Vec<String>),
    /// A record schema: field names and their types, in declaration order.
    Record(Vec<(String, String)>),
}

pub fn check(program: &Program) -> OpalResult<()> {
    TypeChecker::new().check_program(program)
}

struct TypeChecker {
    table: SymbolTable<SymbolInfo>,
    return_type: Option<String>,
}

impl TypeChecker {
    fn new() -> Self {
        Self {
            table: SymbolTable::new(),
            return_type: None,
        }
    }

    fn check_program(&mut self, program: &Program) -> OpalResult<()> {
        self.table.push_frame();
        for builtin in Builtin::all() {
            let signature = builtin
                .signature()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            self.table.add(builtin.name(), SymbolInfo::Function(signature));
        }

        for decl in &program.decls {
            match decl {
                Decl::Fun(f) => self.check_fun_decl(f)?,
                Decl::Type(t) => self.check_type_decl(t)?,
            }
        }

        self.check_main()?;
        self.table.pop_frame();
        Ok(())
    }

    fn check_main(&self) -> OpalResult<()> {
        match self.table.get("main") {
            Some(SymbolInfo::Function(signature)) => {
                if signature.as_slice() == ["int"] {
                    Ok(())
                } else {
                    Err(OpalError::new(
                        Stage::Semantic,
                        "invalid 'main' function: main takes no parameters and returns int",
                    ))
                }
            }
            _ => Err(OpalError::new(Stage::Semantic, "undefined 'main' function")),
        }
    }

    fn check_fun_decl(&mut self, node: &FunDecl) -> OpalResult<()> {
        let mut signature = node
            .params
            .iter()
            .map(|p| p.dtype.lexeme.clone())
            .collect::<Vec<_>>();
        signature.push(node.return_type.lexeme.clone());
        // the name is visible before the body is checked, so direct
        // recursion works
        self.table
            .add(node.id.lexeme.clone(), SymbolInfo::Function(signature));

        self.table.push_frame();
        self.return_type = Some(node.return_type.lexeme.clone());
        for param in &node.params {
            if self.table.exists_in_current(&param.id.lexeme) {
                let err = self.error(
                    format!("duplicate parameter '{}'", param.id.lexeme),
                    Some(&param.id),
                );
                return Err(err);
            }
            self.table.add(
                param.id.lexeme.clone(),
                SymbolInfo::Variable(param.dtype.lexeme.clone()),
            );
        }
        let result = self.check_stmts(&node.stmts);
        self.table.pop_frame();
        self.return_type = None;
        result
    }

    fn check_type_decl(&mut self, node: &TypeDecl) -> OpalResult<()> {
        // insert an empty schema first so fields may reference the type
        // being declared
        self.table
            .add(node.id.lexeme.clone(), SymbolInfo::Record(Vec::new()));

        self.table.push_frame();
        let mut schema = Vec::new();
        for vdecl in &node.vdecls {
            match self.check_var_decl(vdecl) {
                Ok(field_type) => schema.push((vdecl.id.lexeme.clone(), field_type)),
                Err(err) => {
                    self.table.pop_frame();
                    return Err(err);
                }
            }
        }
        self.table.pop_frame();
        self.table
            .assign(&node.id.lexeme, SymbolInfo::Record(schema));
        Ok(())
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) -> OpalResult<()> {
        for stmt in stmts {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_block(&mut self, stmts: &[Stmt]) -> OpalResult<()> {
        self.table.push_frame();
        let result = self.check_stmts(stmts);
        self.table.pop_frame();
        result
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> OpalResult<()> {
        match stmt {
            Stmt::VarDecl(v) => self.check_var_decl(v).map(|_| ()),
            Stmt::Assign(a) => self.check_assign(a),
            Stmt::Return(r) => self.check_return(r),
            Stmt::If(i) => self.check_if(i),
            Stmt::While(w) => self.check_while(w),
            Stmt::For(f) => self.check_for(f),
            Stmt::Call(c) => self.check_call(c).map(|_| ()),
        }
    }

    /// Checks a declaration and returns the declared (or inferred) type.
    fn check_var_decl(&mut self, node: &VarDeclStmt) -> OpalResult<String> {
        if let Some(dtype) = &node.dtype {
            if dtype.kind == TokenKind::Id
                && !matches!(self.table.get(&dtype.lexeme), Some(SymbolInfo::Record(_)))
            {
                return Err(self.error(format!("unknown type '{}'", dtype.lexeme), Some(dtype)));
            }
        }

        let expr_type = self.check_expr(&node.expr)?;
        let var_type = match &node.dtype {
            Some(dtype) => {
                if expr_type != "nil" && expr_type != dtype.lexeme {
                    return Err(self.error(
                        format!(
                            "initializer type '{}' does not match declared type '{}'",
                            expr_type, dtype.lexeme
                        ),
                        Some(dtype),
                    ));
                }
                dtype.lexeme.clone()
            }
            None => {
                if expr_type == "nil" {
                    return Err(self.error(
                        "cannot infer a variable type from a nil initializer",
                        Some(&node.id),
                    ));
                }
                expr_type
            }
        };

        if self.table.exists_in_current(&node.id.lexeme) {
            return Err(self.error(
                format!("redefinition of '{}'", node.id.lexeme),
                Some(&node.id),
            ));
        }
        self.table
            .add(node.id.lexeme.clone(), SymbolInfo::Variable(var_type.clone()));
        Ok(var_type)
    }

    fn check_assign(&mut self, node: &AssignStmt) -> OpalResult<()> {
        let lhs_type = self.check_path(&node.lvalue)?;
        let rhs_type = self.check_expr(&node.expr)?;
        if rhs_type != lhs_type && rhs_type != "nil" {
            return Err(self.error(
                format!("cannot assign '{rhs_type}' to '{lhs_type}'"),
                Some(&node.lvalue[0]),
            ));
        }
        Ok(())
    }

    fn check_return(&mut self, node: &ReturnStmt) -> OpalResult<()> {
        let expr_type = self.check_expr(&node.expr)?;
        let expected = self
            .return_type
            .clone()
            .expect("return statement outside a function body");
        if expr_type != expected && expr_type != "nil" {
            return Err(self.error(
                format!("returned type '{expr_type}' does not match function type '{expected}'"),
                None,
            ));
        }
        Ok(())
    }

    fn check_if(&mut self, node: &IfStmt) -> OpalResult<()> {
        if self.check_expr(&node.if_part.expr)? != "bool" {
            return Err(self.error("if condition must be a bool expression", None));
        }
        self.check_block(&node.if_part.stmts)?;
        for else_if in &node.else_ifs {
            if self.check_expr(&else_if.expr)? != "bool" {
                return Err(self.error("elseif condition must be a bool expression", None));
            }
            self.check_block(&else_if.stmts)?;
        }
        if !node.else_stmts.is_empty() {
            self.check_block(&node.else_stmts)?;
        }
        Ok(())
    }

    fn check_while(&mut self, node: &WhileStmt) -> OpalResult<()> {
        if self.check_expr(&node.expr)? != "bool" {
            return Err(self.error("while condition must be a bool expression", None));
        }
        self.check_block(&node.stmts)
    }

    fn check_for(&mut self, node: &ForStmt) -> OpalResult<()> {
        self.table.push_frame();
        let result = self.check_for_inner(node);
        self.table.pop_frame();
        result
    }

    fn check_for_inner(&mut self, node: &ForStmt) -> OpalResult<()> {
        if self.check_expr(&node.start)? != "int" {
            return Err(self.error("for loop bounds must be int expressions", Some(&node.var_id)));
        }
        self.table.add(
            node.var_id.lexeme.clone(),
            SymbolInfo::Variable("int".to_string()),
        );
        if self.check_expr(&node.end)? != "int" {
            return Err(self.error("for loop bounds must be int expressions", Some(&node.var_id)));
        }
        self.check_block(&node.stmts)
    }

    fn check_expr(&mut self, node: &Expr) -> OpalResult<String> {
        let mut result = self.check_term(&node.first)?;
        if let (Some(op), Some(rest)) = (&node.op, &node.rest) {
            let rhs = self.check_expr(rest)?;
            result = self.binary_result(op, &result, &rhs)?;
        }
        if node.negated && result != "bool" {
            return Err(self.error("cannot apply 'not' to a non-bool expression", None));
        }
        Ok(result)
    }

    fn check_term(&mut self, term: &Term) -> OpalResult<String> {
        match term {
            Term::Simple(rvalue) => self.check_rvalue(rvalue),
            Term::Complex(expr) => self.check_expr(expr),
        }
    }

    fn check_rvalue(&mut self, rvalue: &RValue) -> OpalResult<String> {
        match rvalue {
            RValue::Simple(token) => Ok(token
                .value_type_name()
                .expect("simple rvalue carries a literal token")
                .to_string()),
            RValue::New(type_id) => {
                if matches!(self.table.get(&type_id.lexeme), Some(SymbolInfo::Record(_))) {
                    Ok(type_id.lexeme.clone())
                } else {
                    Err(self.error(format!("unknown type '{}'", type_id.lexeme), Some(type_id)))
                }
            }
            RValue::Call(call) => self.check_call(call),
            RValue::Path(path) => self.check_path(path),
            RValue::Negated(expr) => {
                let expr_type = self.check_expr(expr)?;
                if expr_type == "int" || expr_type == "double" {
                    Ok(expr_type)
                } else {
                    Err(self.error("cannot negate a non-numeric expression", None))
                }
            }
        }
    }

    fn check_call(&mut self, node: &CallExpr) -> OpalResult<String> {
        let name = &node.function_id.lexeme;
        let signature = match self.table.get(name) {
            Some(SymbolInfo::Function(signature)) => signature.clone(),
            Some(_) => {
                return Err(self.error(
                    format!("'{name}' is not a function"),
                    Some(&node.function_id),
                ));
            }
            None => {
                return Err(self.error(
                    format!("undefined function '{name}'"),
                    Some(&node.function_id),
                ));
            }
        };

        let (param_types, return_type) = signature.split_at(signature.len() - 1);
        if node.args.len() != param_types.len() {
            return Err(self.error(
                format!(
                    "function '{name}' expects {} arguments, got {}",
                    param_types.len(),
                    node.args.len()
                ),
                Some(&node.function_id),
            ));
        }
        for (arg, expected) in node.args.iter().zip(param_types) {
            let arg_type = self.check_expr(arg)?;
            if arg_type != *expected && arg_type != "nil" {
                return Err(self.error(
                    format!(
                        "argument type '{arg_type}' does not match parameter type '{expected}' \
                         in call to '{name}'"
                    ),
                    Some(&node.function_id),
                ));
            }
        }
        Ok(return_type[0].clone())
    }

    /// Resolves a dotted path: the head must be a variable, every later
    /// component a field of the previous component's record type.
    fn check_path(&mut self, path: &[Token]) -> OpalResult<String> {
        let first = &path[0];
        let mut current = match self.table.get(&first.lexeme) {
            Some(SymbolInfo::Variable(var_type)) => var_type.clone(),
            Some(_) => {
                return Err(self.error(format!("'{}' is not a variable", first.lexeme), Some(first)));
            }
            None => {
                return Err(self.error(
                    format!("undefined variable '{}'", first.lexeme),
                    Some(first),
                ));
            }
        };

        for field in &path[1..] {
            let schema = match self.table.get(&current) {
                Some(SymbolInfo::Record(schema)) => schema,
                _ => {
                    return Err(self.error(format!("type '{current}' has no fields"), Some(field)));
                }
            };
            match schema.iter().find(|(name, _)| *name == field.lexeme) {
                Some((_, field_type)) => current = field_type.clone(),
                None => {
                    return Err(self.error(
                        format!("type '{current}' has no field '{}'", field.lexeme),
                        Some(field),
                    ));
                }
            }
        }
        Ok(current)
    }

    fn binary_result(&self, op: &Token, lhs: &str, rhs: &str) -> OpalResult<String> {
        let result = match op.kind {
            TokenKind::Plus if lhs == "char" || lhs == "string" => {
                if rhs == "char" || rhs == "string" {
                    "string".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            TokenKind::Plus | TokenKind::Minus | TokenKind::Multiply | TokenKind::Divide => {
                if lhs == "int" && rhs == "int" {
                    "int".to_string()
                } else if lhs == "double" && rhs == "double" {
                    "double".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            TokenKind::Modulo => {
                if lhs == "int" && rhs == "int" {
                    "int".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let comparable = matches!(lhs, "int" | "double" | "char" | "string");
                if comparable && lhs == rhs {
                    "bool".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            TokenKind::And | TokenKind::Or => {
                if lhs == "bool" && rhs == "bool" {
                    "bool".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            TokenKind::Equal | TokenKind::NotEqual => {
                if lhs == rhs || lhs == "nil" || rhs == "nil" {
                    "bool".to_string()
                } else {
                    return Err(self.op_error(op, lhs, rhs));
                }
            }
            _ => {
                return Err(self.error(
                    format!("'{}' is not a binary operator", op.lexeme),
                    Some(op),
                ));
            }
        };
        Ok(result)
    }

    fn op_error(&self, op: &Token, lhs: &str, rhs: &str) -> OpalError {
        self.error(
            format!("cannot apply '{}' to '{lhs}' and '{rhs}'", op.lexeme),
            Some(op),
        )
    }

    fn error(&self, message: impl Into<String>, token: Option<&Token>) -> OpalError {
        match token {
            Some(token) => OpalError::at_token(Stage::Semantic, message, token),
            None => OpalError::new(Stage::Semantic, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use indoc::indoc;

    fn check_source(input: &str) -> OpalResult<()> {
        let program =
            parse_tokens(tokenize(input).expect("tokenize should succeed")).expect("parse failed");
        check(&program)
    }

    fn expect_semantic(input: &str) -> OpalError {
        let err = check_source(input).expect_err("expected semantic failure");
        assert_eq!(err.stage, Stage::Semantic);
        err
    }

    #[test]
    fn accepts_a_representative_program() {
        let source = indoc! {r#"
            type Node
              var value = 0
              var next: Node = nil
            end

            fun int sum(head: Node)
              var total = 0
              var cursor: Node = head
              while not (cursor == nil) do
                total = total + cursor.value
                cursor = cursor.next
              end
              return total
            end

            fun int main()
              var head = new Node
              head.value = 2
              head.next = new Node
              head.next.value = 3
              print("total: " + itos(sum(head)) + "\n")
              if ('a' < 'b') and (1.5 < 2.5) then
                return sum(head)
              end
              return 0
            end
        "#};
        check_source(source).expect("program should type check");
    }

    #[test]
    fn requires_a_main_function() {
        let err = expect_semantic("fun int other() return 0 end");
        assert!(err.to_string().contains("undefined 'main'"));
    }

    #[test]
    fn rejects_main_with_parameters_or_wrong_return() {
        assert!(check_source("fun int main(x: int) return 0 end").is_err());
        assert!(check_source("fun nil main() return nil end").is_err());
    }

    #[test]
    fn rejects_mismatched_annotation_and_reports_its_position() {
        let err = expect_semantic("fun int main() var x: int = \"x\" return 0 end");
        // position of the 'int' annotation
        assert_eq!((err.line, err.column), (Some(1), Some(23)));
    }

    #[test]
    fn annotated_nil_initializer_keeps_declared_type() {
        let source = indoc! {"
            type Node
              var value = 0
            end

            fun int main()
              var n: Node = nil
              n = new Node
              return n.value
            end
        "};
        check_source(source).expect("program should type check");
    }

    #[test]
    fn rejects_inferred_nil_initializer() {
        let err = expect_semantic("fun int main() var x = nil return 0 end");
        assert!(err.to_string().contains("nil initializer"));
    }

    #[test]
    fn rejects_redefinition_in_the_same_frame() {
        let err = expect_semantic("fun int main() var x = 1 var x = 2 return x end");
        assert!(err.to_string().contains("redefinition"));
    }

    #[test]
    fn allows_shadowing_in_a_nested_frame() {
        let source = indoc! {"
            fun int main()
              var x = 1
              if true then
                var x = 2
                x = 3
              end
              return x
            end
        "};
        check_source(source).expect("shadowing should be allowed");
    }

    #[test]
    fn block_locals_are_not_visible_after_the_block() {
        let err = expect_semantic(indoc! {"
            fun int main()
              while false do
                var hidden = 1
              end
              return hidden
            end
        "});
        assert!(err.to_string().contains("undefined variable 'hidden'"));
    }

    #[test]
    fn rejects_unknown_type_annotation() {
        let err = expect_semantic("fun int main() var n: Node = nil return 0 end");
        assert!(err.to_string().contains("unknown type 'Node'"));
    }

    #[test]
    fn rejects_new_of_unknown_type() {
        let err = expect_semantic("fun int main() var n = new Node return 0 end");
        assert!(err.to_string().contains("unknown type 'Node'"));
    }

    #[test]
    fn checks_assignment_paths() {
        let base = indoc! {"
            type P
              var x = 0
            end

            fun int main()
              var p = new P
              {stmt}
              return 0
            end
        "};
        assert!(check_source(&base.replace("{stmt}", "p.x = 3")).is_ok());
        let err = check_source(&base.replace("{stmt}", "p.y = 3")).expect_err("unknown field");
        assert!(err.to_string().contains("has no field 'y'"));
        let err = check_source(&base.replace("{stmt}", "q.x = 3")).expect_err("unknown root");
        assert!(err.to_string().contains("undefined variable 'q'"));
        let err = check_source(&base.replace("{stmt}", "p.x.z = 3")).expect_err("non-record hop");
        assert!(err.to_string().contains("has no fields"));
        let err = check_source(&base.replace("{stmt}", "p.x = \"s\"")).expect_err("rhs mismatch");
        assert!(err.to_string().contains("cannot assign"));
    }

    #[test]
    fn record_assignment_accepts_nil() {
        let source = indoc! {"
            type P
              var x = 0
            end

            fun int main()
              var p = new P
              p = nil
              return 0
            end
        "};
        check_source(source).expect("nil should be assignable to a record variable");
    }

    #[test]
    fn rejects_return_type_mismatch() {
        let err = expect_semantic("fun int main() return \"zero\" end");
        assert!(err.to_string().contains("does not match function type"));
    }

    #[test]
    fn guards_must_be_bool() {
        assert!(check_source("fun int main() if 1 then return 1 end return 0 end").is_err());
        assert!(check_source("fun int main() while 1 do return 1 end return 0 end").is_err());
        assert!(
            check_source("fun int main() if true then return 1 elseif 2 then return 2 end return 0 end")
                .is_err()
        );
    }

    #[test]
    fn for_bounds_must_be_int() {
        assert!(check_source("fun int main() for i = 1.0 to 5 do end return 0 end").is_err());
        assert!(check_source("fun int main() for i = 1 to true do end return 0 end").is_err());
        check_source("fun int main() for i = 1 to 5 do var x = i end return 0 end")
            .expect("loop variable should be an int in scope");
    }

    #[test]
    fn arithmetic_requires_matching_numeric_operands() {
        assert!(check_source("fun int main() var x = 1 + 2.0 return 0 end").is_err());
        assert!(check_source("fun int main() var x = true * false return 0 end").is_err());
        assert!(check_source("fun int main() var x = 1.5 % 2.0 return 0 end").is_err());
    }

    #[test]
    fn plus_concatenates_chars_and_strings() {
        let source = indoc! {r#"
            fun int main()
              var a: string = 'a' + 'b'
              var b: string = 'a' + "bc"
              var c: string = "ab" + 'c'
              var d: string = "ab" + "cd"
              return 0
            end
        "#};
        check_source(source).expect("concatenation should type check");
        assert!(check_source("fun int main() var x = \"a\" + 1 return 0 end").is_err());
    }

    #[test]
    fn comparisons_and_equality_rules() {
        check_source("fun int main() var b = \"a\" < \"b\" return 0 end").expect("string compare");
        assert!(check_source("fun int main() var b = 1 < 2.0 return 0 end").is_err());
        assert!(check_source("fun int main() var b = true < false return 0 end").is_err());
        check_source("fun int main() var b = 1 == 2 return 0 end").expect("int equality");
        assert!(check_source("fun int main() var b = 1 == \"x\" return 0 end").is_err());
        check_source(indoc! {"
            type P
              var x = 0
            end

            fun int main()
              var p = new P
              var b = p == nil
              return 0
            end
        "})
        .expect("nil equality against a record");
    }

    #[test]
    fn logical_operators_require_bools() {
        assert!(check_source("fun int main() var b = 1 and 2 return 0 end").is_err());
        assert!(check_source("fun int main() var b = not 1 return 0 end").is_err());
        check_source("fun int main() var b = not (1 < 2) or false return 0 end")
            .expect("bool logic should type check");
    }

    #[test]
    fn neg_requires_a_numeric_operand() {
        assert!(check_source("fun int main() var x = neg true return 0 end").is_err());
        check_source("fun int main() var x = neg 3 var y = neg 2.5 return x end")
            .expect("numeric negation should type check");
    }

    #[test]
    fn checks_call_shapes() {
        let base = indoc! {"
            fun int twice(x: int)
              return x + x
            end

            fun int main()
              return {call}
            end
        "};
        assert!(check_source(&base.replace("{call}", "twice(2)")).is_ok());
        let err = check_source(&base.replace("{call}", "twice(2, 3)")).expect_err("arity");
        assert!(err.to_string().contains("expects 1 arguments, got 2"));
        let err = check_source(&base.replace("{call}", "twice(\"s\")")).expect_err("arg type");
        assert!(err.to_string().contains("argument type"));
        let err = check_source(&base.replace("{call}", "missing(2)")).expect_err("unknown");
        assert!(err.to_string().contains("undefined function"));
    }

    #[test]
    fn calling_a_variable_is_an_error() {
        let err = expect_semantic(indoc! {"
            fun int main()
              var f = 1
              return f()
            end
        "});
        assert!(err.to_string().contains("is not a function"));
    }

    #[test]
    fn calls_resolve_in_source_order_only() {
        // 'later' is declared after 'main', so the call does not resolve
        let err = expect_semantic(indoc! {"
            fun int main()
              return later()
            end

            fun int later()
              return 1
            end
        "});
        assert!(err.to_string().contains("undefined function 'later'"));
    }

    #[test]
    fn builtins_are_always_visible() {
        let source = indoc! {r#"
            fun int main()
              var line = read()
              print(itos(stoi("12") + length(line)) + dtos(stod("1.5")))
              var c: char = get(0, "abc")
              return 0
            end
        "#};
        check_source(source).expect("builtin calls should type check");
    }
}
