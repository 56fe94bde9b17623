//! Renders an AST back to canonical Opal source.
//!
//! The output re-lexes and re-parses to a structurally identical tree, which
//! the parser round-trip tests rely on.

use std::fmt::Write;

use crate::ast::{
    AssignStmt, CallExpr, Decl, Expr, ForStmt, FunDecl, IfStmt, Program, RValue, ReturnStmt,
    Stmt, Term, TypeDecl, VarDeclStmt, WhileStmt,
};
use crate::token::{Token, TokenKind};

pub fn render(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.program(program);
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn program(&mut self, node: &Program) {
        for decl in &node.decls {
            match decl {
                Decl::Fun(f) => self.fun_decl(f),
                Decl::Type(t) => self.type_decl(t),
            }
            self.out.push('\n');
        }
    }

    fn fun_decl(&mut self, node: &FunDecl) {
        let params = node
            .params
            .iter()
            .map(|p| format!("{}: {}", p.id.lexeme, p.dtype.lexeme))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            self.out,
            "fun {} {}({})",
            node.return_type.lexeme, node.id.lexeme, params
        );
        self.block(&node.stmts);
        self.out.push_str("end\n");
    }

    fn type_decl(&mut self, node: &TypeDecl) {
        let _ = writeln!(self.out, "type {}", node.id.lexeme);
        self.indent += 1;
        for vdecl in &node.vdecls {
            self.line_start();
            self.var_decl(vdecl);
            self.out.push('\n');
        }
        self.indent -= 1;
        self.out.push_str("end\n");
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.indent += 1;
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
    }

    fn stmt(&mut self, node: &Stmt) {
        self.line_start();
        match node {
            Stmt::VarDecl(v) => {
                self.var_decl(v);
                self.out.push('\n');
            }
            Stmt::Assign(a) => {
                self.assign(a);
                self.out.push('\n');
            }
            Stmt::Return(r) => {
                self.return_stmt(r);
                self.out.push('\n');
            }
            Stmt::If(i) => self.if_stmt(i),
            Stmt::While(w) => self.while_stmt(w),
            Stmt::For(f) => self.for_stmt(f),
            Stmt::Call(c) => {
                self.call(c);
                self.out.push('\n');
            }
        }
    }

    fn var_decl(&mut self, node: &VarDeclStmt) {
        match &node.dtype {
            Some(dtype) => {
                let _ = write!(self.out, "var {}: {} = ", node.id.lexeme, dtype.lexeme);
            }
            None => {
                let _ = write!(self.out, "var {} = ", node.id.lexeme);
            }
        }
        self.expr(&node.expr);
    }

    fn assign(&mut self, node: &AssignStmt) {
        self.path(&node.lvalue);
        self.out.push_str(" = ");
        self.expr(&node.expr);
    }

    fn return_stmt(&mut self, node: &ReturnStmt) {
        self.out.push_str("return ");
        self.expr(&node.expr);
    }

    fn if_stmt(&mut self, node: &IfStmt) {
        self.out.push_str("if ");
        self.expr(&node.if_part.expr);
        self.out.push_str(" then\n");
        self.block(&node.if_part.stmts);
        for else_if in &node.else_ifs {
            self.line_start();
            self.out.push_str("elseif ");
            self.expr(&else_if.expr);
            self.out.push_str(" then\n");
            self.block(&else_if.stmts);
        }
        if !node.else_stmts.is_empty() {
            self.line_start();
            self.out.push_str("else\n");
            self.block(&node.else_stmts);
        }
        self.line_start();
        self.out.push_str("end\n");
    }

    fn while_stmt(&mut self, node: &WhileStmt) {
        self.out.push_str("while ");
        self.expr(&node.expr);
        self.out.push_str(" do\n");
        self.block(&node.stmts);
        self.line_start();
        self.out.push_str("end\n");
    }

    fn for_stmt(&mut self, node: &ForStmt) {
        let _ = write!(self.out, "for {} = ", node.var_id.lexeme);
        self.expr(&node.start);
        self.out.push_str(" to ");
        self.expr(&node.end);
        self.out.push_str(" do\n");
        self.block(&node.stmts);
        self.line_start();
        self.out.push_str("end\n");
    }

    fn call(&mut self, node: &CallExpr) {
        let _ = write!(self.out, "{}(", node.function_id.lexeme);
        for (i, arg) in node.args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg);
        }
        self.out.push(')');
    }

    fn expr(&mut self, node: &Expr) {
        if node.negated {
            // 'not' binds the whole remainder of the expression, so the
            // wrapped tree is emitted without parentheses to keep the
            // re-parsed shape identical
            self.out.push_str("not ");
            match &node.first {
                Term::Complex(inner) => self.expr(inner),
                Term::Simple(rvalue) => self.rvalue(rvalue),
            }
        } else {
            match &node.first {
                Term::Simple(rvalue) => self.rvalue(rvalue),
                Term::Complex(inner) => {
                    self.out.push('(');
                    self.expr(inner);
                    self.out.push(')');
                }
            }
        }
        if let (Some(op), Some(rest)) = (&node.op, &node.rest) {
            let _ = write!(self.out, " {} ", op.lexeme);
            self.expr(rest);
        }
    }

    fn rvalue(&mut self, node: &RValue) {
        match node {
            RValue::Simple(token) => self.literal(token),
            RValue::New(type_id) => {
                let _ = write!(self.out, "new {}", type_id.lexeme);
            }
            RValue::Call(call) => self.call(call),
            RValue::Path(path) => self.path(path),
            RValue::Negated(expr) => {
                self.out.push_str("neg ");
                self.expr(expr);
            }
        }
    }

    fn literal(&mut self, token: &Token) {
        match token.kind {
            TokenKind::StringVal => {
                let _ = write!(self.out, "\"{}\"", token.lexeme);
            }
            TokenKind::CharVal => {
                let _ = write!(self.out, "'{}'", token.lexeme);
            }
            _ => self.out.push_str(&token.lexeme),
        }
    }

    fn path(&mut self, path: &[Token]) {
        let rendered = path
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(".");
        self.out.push_str(&rendered);
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use indoc::indoc;

    fn parse(input: &str) -> Program {
        parse_tokens(tokenize(input).expect("tokenize should succeed")).expect("parse failed")
    }

    #[test]
    fn renders_canonical_source() {
        let program = parse("fun int main() var x=1+2 return x end");
        let expected = indoc! {"
            fun int main()
              var x = 1 + 2
              return x
            end

        "};
        assert_eq!(render(&program), expected);
    }

    #[test]
    fn rendered_source_reparses_to_a_stable_tree() {
        let source = indoc! {r#"
            type Node
              var value = 0
              var next: Node = nil
            end

            fun nil show(n: Node)
              print(itos(n.value) + "\n")
            end

            fun int main()
              var head = new Node
              head.value = 3
              var total = 0
              for i = 1 to 10 do
                if i % 2 == 0 then
                  total = total + i
                elseif i > 7 then
                  total = total - 1
                else
                  total = total + neg 1
                end
              end
              while not (total < 0) do
                total = total - head.value
              end
              show(head)
              return total
            end
        "#};
        let first = render(&parse(source));
        let second = render(&parse(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn renders_not_without_extra_parentheses() {
        let program = parse("fun nil f() var b = not x == y end");
        let rendered = render(&program);
        assert!(rendered.contains("var b = not x == y"));
        let again = render(&parse(&rendered));
        assert_eq!(rendered, again);
    }
}
