use crate::ast::{
    AssignStmt, BasicIf, CallExpr, Decl, Expr, ForStmt, FunDecl, FunParam, IfStmt, Program,
    RValue, ReturnStmt, Stmt, Term, TypeDecl, VarDeclStmt, WhileStmt,
};
use crate::error::{OpalError, OpalResult, Stage};
use crate::token::{Token, TokenKind};

/// Recursive-descent parser with one-token lookahead. The expression grammar
/// is right-recursive, so every binary operator parses right-associative
/// with uniform precedence; parentheses are the only grouping mechanism.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    current: Token,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eos, "", 1, 1));
        }
        let current = tokens[0].clone();
        Self {
            tokens,
            pos: 0,
            current,
        }
    }

    pub fn parse_program(mut self) -> OpalResult<Program> {
        let mut decls = Vec::new();
        while !matches!(self.current.kind, TokenKind::Eos) {
            if matches!(self.current.kind, TokenKind::Type) {
                decls.push(Decl::Type(self.type_decl()?));
            } else {
                decls.push(Decl::Fun(self.fun_decl()?));
            }
        }
        Ok(Program { decls })
    }

    fn type_decl(&mut self) -> OpalResult<TypeDecl> {
        self.eat(TokenKind::Type, "'type'")?;
        let id = self.eat(TokenKind::Id, "type name")?;
        let mut vdecls = Vec::new();
        while matches!(self.current.kind, TokenKind::Var) {
            vdecls.push(self.var_decl_stmt()?);
        }
        self.eat(TokenKind::End, "'end'")?;
        Ok(TypeDecl { id, vdecls })
    }

    fn fun_decl(&mut self) -> OpalResult<FunDecl> {
        self.eat(TokenKind::Fun, "'fun'")?;
        let return_type = if matches!(self.current.kind, TokenKind::Nil) {
            self.advance()
        } else {
            self.dtype()?
        };
        let id = self.eat(TokenKind::Id, "function name")?;
        self.eat(TokenKind::LParen, "'('")?;
        let params = self.params()?;
        self.eat(TokenKind::RParen, "')'")?;
        let stmts = self.stmts()?;
        self.eat(TokenKind::End, "'end'")?;
        Ok(FunDecl {
            return_type,
            id,
            params,
            stmts,
        })
    }

    fn params(&mut self) -> OpalResult<Vec<FunParam>> {
        let mut params = Vec::new();
        if !matches!(self.current.kind, TokenKind::Id) {
            return Ok(params);
        }
        loop {
            let id = self.eat(TokenKind::Id, "parameter name")?;
            self.eat(TokenKind::Colon, "':'")?;
            let dtype = self.dtype()?;
            params.push(FunParam { id, dtype });
            if matches!(self.current.kind, TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn dtype(&mut self) -> OpalResult<Token> {
        match self.current.kind {
            TokenKind::IntType
            | TokenKind::DoubleType
            | TokenKind::BoolType
            | TokenKind::CharType
            | TokenKind::StringType
            | TokenKind::Id => Ok(self.advance()),
            _ => Err(self.error("a type name")),
        }
    }

    fn stmts(&mut self) -> OpalResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while matches!(
            self.current.kind,
            TokenKind::Var
                | TokenKind::Id
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
        ) {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> OpalResult<Stmt> {
        match self.current.kind {
            TokenKind::Var => Ok(Stmt::VarDecl(self.var_decl_stmt()?)),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Return => self.return_stmt(),
            _ => {
                // A leading identifier is a call statement when '(' follows,
                // otherwise an assignment.
                let first = self.eat(TokenKind::Id, "a statement")?;
                if matches!(self.current.kind, TokenKind::LParen) {
                    Ok(Stmt::Call(self.call_expr(first)?))
                } else {
                    Ok(Stmt::Assign(self.assign_stmt(first)?))
                }
            }
        }
    }

    fn var_decl_stmt(&mut self) -> OpalResult<VarDeclStmt> {
        self.eat(TokenKind::Var, "'var'")?;
        let id = self.eat(TokenKind::Id, "variable name")?;
        let dtype = if matches!(self.current.kind, TokenKind::Colon) {
            self.advance();
            Some(self.dtype()?)
        } else {
            None
        };
        self.eat(TokenKind::Assign, "'='")?;
        let expr = self.expr()?;
        Ok(VarDeclStmt { id, dtype, expr })
    }

    fn assign_stmt(&mut self, first: Token) -> OpalResult<AssignStmt> {
        let mut lvalue = vec![first];
        while matches!(self.current.kind, TokenKind::Dot) {
            self.advance();
            lvalue.push(self.eat(TokenKind::Id, "field name")?);
        }
        self.eat(TokenKind::Assign, "'='")?;
        let expr = self.expr()?;
        Ok(AssignStmt { lvalue, expr })
    }

    fn if_stmt(&mut self) -> OpalResult<Stmt> {
        self.eat(TokenKind::If, "'if'")?;
        let expr = self.expr()?;
        self.eat(TokenKind::Then, "'then'")?;
        let stmts = self.stmts()?;
        let if_part = BasicIf { expr, stmts };

        let mut else_ifs = Vec::new();
        while matches!(self.current.kind, TokenKind::ElseIf) {
            self.advance();
            let expr = self.expr()?;
            self.eat(TokenKind::Then, "'then'")?;
            let stmts = self.stmts()?;
            else_ifs.push(BasicIf { expr, stmts });
        }

        let mut else_stmts = Vec::new();
        if matches!(self.current.kind, TokenKind::Else) {
            self.advance();
            else_stmts = self.stmts()?;
        }
        self.eat(TokenKind::End, "'end'")?;
        Ok(Stmt::If(IfStmt {
            if_part,
            else_ifs,
            else_stmts,
        }))
    }

    fn while_stmt(&mut self) -> OpalResult<Stmt> {
        self.eat(TokenKind::While, "'while'")?;
        let expr = self.expr()?;
        self.eat(TokenKind::Do, "'do'")?;
        let stmts = self.stmts()?;
        self.eat(TokenKind::End, "'end'")?;
        Ok(Stmt::While(WhileStmt { expr, stmts }))
    }

    fn for_stmt(&mut self) -> OpalResult<Stmt> {
        self.eat(TokenKind::For, "'for'")?;
        let var_id = self.eat(TokenKind::Id, "loop variable")?;
        self.eat(TokenKind::Assign, "'='")?;
        let start = self.expr()?;
        self.eat(TokenKind::To, "'to'")?;
        let end = self.expr()?;
        self.eat(TokenKind::Do, "'do'")?;
        let stmts = self.stmts()?;
        self.eat(TokenKind::End, "'end'")?;
        Ok(Stmt::For(ForStmt {
            var_id,
            start,
            end,
            stmts,
        }))
    }

    fn return_stmt(&mut self) -> OpalResult<Stmt> {
        self.eat(TokenKind::Return, "'return'")?;
        let expr = self.expr()?;
        Ok(Stmt::Return(ReturnStmt { expr }))
    }

    fn call_expr(&mut self, function_id: Token) -> OpalResult<CallExpr> {
        self.eat(TokenKind::LParen, "'('")?;
        let args = self.args()?;
        self.eat(TokenKind::RParen, "')'")?;
        Ok(CallExpr { function_id, args })
    }

    fn args(&mut self) -> OpalResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.starts_expr() {
            return Ok(args);
        }
        args.push(self.expr()?);
        while matches!(self.current.kind, TokenKind::Comma) {
            self.advance();
            args.push(self.expr()?);
        }
        Ok(args)
    }

    fn starts_expr(&self) -> bool {
        self.current.kind.is_value()
            || matches!(
                self.current.kind,
                TokenKind::Nil
                    | TokenKind::New
                    | TokenKind::Id
                    | TokenKind::Neg
                    | TokenKind::Not
                    | TokenKind::LParen
            )
    }

    fn expr(&mut self) -> OpalResult<Expr> {
        let mut negated = false;
        let first = match self.current.kind {
            TokenKind::Not => {
                self.advance();
                negated = true;
                Term::Complex(Box::new(self.expr()?))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.eat(TokenKind::RParen, "')'")?;
                Term::Complex(Box::new(inner))
            }
            _ => Term::Simple(self.rvalue()?),
        };

        let mut op = None;
        let mut rest = None;
        if self.current.kind.is_operator() {
            op = Some(self.advance());
            rest = Some(Box::new(self.expr()?));
        }
        Ok(Expr {
            negated,
            first,
            op,
            rest,
        })
    }

    fn rvalue(&mut self) -> OpalResult<RValue> {
        match self.current.kind {
            kind if kind.is_value() => Ok(RValue::Simple(self.advance())),
            TokenKind::Nil => Ok(RValue::Simple(self.advance())),
            TokenKind::New => {
                self.advance();
                Ok(RValue::New(self.eat(TokenKind::Id, "type name")?))
            }
            TokenKind::Neg => {
                self.advance();
                Ok(RValue::Negated(Box::new(self.expr()?)))
            }
            TokenKind::Id => {
                let id = self.advance();
                if matches!(self.current.kind, TokenKind::LParen) {
                    Ok(RValue::Call(self.call_expr(id)?))
                } else {
                    let mut path = vec![id];
                    while matches!(self.current.kind, TokenKind::Dot) {
                        self.advance();
                        path.push(self.eat(TokenKind::Id, "field name")?);
                    }
                    Ok(RValue::Path(path))
                }
            }
            _ => Err(self.error("an expression")),
        }
    }

    fn eat(&mut self, kind: TokenKind, expected: &str) -> OpalResult<Token> {
        if self.current.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn advance(&mut self) -> Token {
        let next = self
            .tokens
            .get(self.pos + 1)
            .cloned()
            .unwrap_or_else(|| {
                Token::new(TokenKind::Eos, "", self.current.line, self.current.column)
            });
        self.pos = self.pos.saturating_add(1);
        std::mem::replace(&mut self.current, next)
    }

    fn error(&self, expected: &str) -> OpalError {
        let found = if matches!(self.current.kind, TokenKind::Eos) {
            "end of file".to_string()
        } else {
            format!("'{}'", self.current.lexeme)
        };
        OpalError::at_token(
            Stage::Syntax,
            format!("expected {expected}, found {found}"),
            &self.current,
        )
    }
}

pub fn parse_tokens(tokens: Vec<Token>) -> OpalResult<Program> {
    Parser::new(tokens).parse_program()
}
