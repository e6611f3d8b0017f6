// ABOUTME: Recursive-descent parser with Pratt-style precedence (spec §4.2)

use crate::ast::{BinOpKind, Block, Expr, FunctionBody, LocalAttrib, Stmt, UnOpKind};
use crate::error::SyntaxError;
use crate::lexer::{Lexer, Token, TokenKind};
use std::rc::Rc;

pub fn parse(source: &str) -> Result<Block, crate::error::Error> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    let block = parser.parse_chunk()?;
    Ok(block)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Local declarations per open block, innermost last, each recorded as
    /// `(name, is_const)` in declaration order. Checked against every
    /// assignment target so reassigning a const local is a `SyntaxError`
    /// rather than a silent no-op (spec §1 Supplement); a non-const
    /// redeclaration of the same name at a deeper scope must shadow an
    /// outer const entry, so lookup walks scopes innermost-first and, within
    /// a scope, takes the most recent declaration of that name.
    const_scopes: Vec<Vec<(String, bool)>>,
}

type PResult<T> = Result<T, SyntaxError>;

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            const_scopes: Vec::new(),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn line(&self) -> u32 {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    /// Whether `name`'s nearest enclosing local declaration (innermost
    /// scope first, most recent declaration within a scope) was `<const>`.
    /// A non-const redeclaration at a deeper scope shadows an outer const
    /// entry rather than leaking its const-ness into the inner scope.
    fn is_const_name(&self, name: &str) -> bool {
        for scope in self.const_scopes.iter().rev() {
            if let Some((_, is_const)) = scope.iter().rev().find(|(n, _)| n == name) {
                return *is_const;
            }
        }
        false
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "'{:?}' expected near '{:?}'",
                kind,
                self.current().kind
            )))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match &self.current().kind {
            TokenKind::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!("<name> expected near '{:?}'", other))),
        }
    }

    fn at_block_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
                | TokenKind::Eof
        )
    }

    pub fn parse_chunk(&mut self) -> PResult<Block> {
        let block = self.parse_block()?;
        if !matches!(self.current().kind, TokenKind::Eof) {
            return Err(self.err(format!("unexpected token '{:?}'", self.current().kind)));
        }
        Ok(block)
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.const_scopes.push(Vec::new());
        let mut stmts = Vec::new();
        while !self.at_block_end() {
            if matches!(self.current().kind, TokenKind::Semi) {
                self.advance();
                continue;
            }
            if matches!(self.current().kind, TokenKind::Return) {
                stmts.push(self.parse_return()?);
                break;
            }
            self.parse_statement_into(&mut stmts)?;
        }
        self.const_scopes.pop();
        Ok(Block { stmts })
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        self.advance(); // 'return'
        let values = if self.at_block_end() || matches!(self.current().kind, TokenKind::Semi) {
            Vec::new()
        } else {
            self.parse_explist()?
        };
        if matches!(self.current().kind, TokenKind::Semi) {
            self.advance();
        }
        Ok(Stmt::Return { values })
    }

    /// Parses one source-level statement, pushing one or two AST statements
    /// (`local function` desugars into a local declaration followed by an
    /// assignment, so recursive calls inside the body resolve).
    fn parse_statement_into(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let line = self.line();
        match &self.current().kind {
            TokenKind::Break => {
                self.advance();
                out.push(Stmt::Break);
            }
            TokenKind::Goto => {
                self.advance();
                let label = self.expect_name()?;
                out.push(Stmt::Goto { label, line });
            }
            TokenKind::DoubleColon => {
                self.advance();
                let name = self.expect_name()?;
                self.expect(TokenKind::DoubleColon)?;
                out.push(Stmt::Label(name));
            }
            TokenKind::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect(TokenKind::End)?;
                out.push(Stmt::Do(body));
            }
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expr(1)?;
                self.expect(TokenKind::Do)?;
                let body = self.parse_block()?;
                self.expect(TokenKind::End)?;
                out.push(Stmt::While {
                    condition,
                    body,
                    line,
                });
            }
            TokenKind::Repeat => {
                self.advance();
                let body = self.parse_block()?;
                self.expect(TokenKind::Until)?;
                let condition = self.parse_expr(1)?;
                out.push(Stmt::Repeat {
                    body,
                    condition,
                    line,
                });
            }
            TokenKind::If => {
                out.push(self.parse_if()?);
            }
            TokenKind::For => {
                out.push(self.parse_for()?);
            }
            TokenKind::Function => {
                out.push(self.parse_function_stmt()?);
            }
            TokenKind::Local => {
                self.parse_local_into(out, line)?;
            }
            _ => {
                out.push(self.parse_expr_stmt(line)?);
            }
        }
        Ok(())
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance(); // 'if'
        let mut clauses = Vec::new();
        let condition = self.parse_expr(1)?;
        self.expect(TokenKind::Then)?;
        let body = self.parse_block()?;
        clauses.push((Some(condition), body));
        loop {
            match self.current().kind {
                TokenKind::Elseif => {
                    self.advance();
                    let condition = self.parse_expr(1)?;
                    self.expect(TokenKind::Then)?;
                    let body = self.parse_block()?;
                    clauses.push((Some(condition), body));
                }
                TokenKind::Else => {
                    self.advance();
                    let body = self.parse_block()?;
                    clauses.push((None, body));
                    break;
                }
                _ => break,
            }
        }
        self.expect(TokenKind::End)?;
        Ok(Stmt::If { clauses })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // 'for'
        let first_name = self.expect_name()?;
        if matches!(self.current().kind, TokenKind::Assign) {
            self.advance();
            let start = self.parse_expr(1)?;
            self.expect(TokenKind::Comma)?;
            let stop = self.parse_expr(1)?;
            let step = if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                Some(self.parse_expr(1)?)
            } else {
                None
            };
            self.expect(TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::NumericFor {
                name: first_name,
                start,
                stop,
                step,
                body,
                line,
            })
        } else {
            let mut names = vec![first_name];
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                names.push(self.expect_name()?);
            }
            self.expect(TokenKind::In)?;
            let iterators = self.parse_explist()?;
            self.expect(TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::GenericFor {
                names,
                iterators,
                body,
                line,
            })
        }
    }

    fn parse_function_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // 'function'
        let first = self.expect_name()?;
        let mut target = Expr::Name(first);
        let mut is_method = false;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_name()?;
                    target = Expr::Field {
                        table: Box::new(target),
                        field,
                    };
                }
                TokenKind::Colon => {
                    self.advance();
                    let field = self.expect_name()?;
                    target = Expr::Field {
                        table: Box::new(target),
                        field,
                    };
                    is_method = true;
                    break;
                }
                _ => break,
            }
        }
        let name = display_funcname(&target);
        let body = self.parse_funcbody(is_method, Some(name))?;
        Ok(Stmt::Assign {
            targets: vec![target],
            values: vec![Expr::Function(body)],
            line,
        })
    }

    fn parse_local_into(&mut self, out: &mut Vec<Stmt>, line: u32) -> PResult<()> {
        self.advance(); // 'local'
        if matches!(self.current().kind, TokenKind::Function) {
            self.advance();
            let name = self.expect_name()?;
            self.const_scopes.last_mut().unwrap().push((name.clone(), false));
            let body = self.parse_funcbody(false, Some(name.clone()))?;
            // Declare before evaluating the body, so recursive calls resolve.
            out.push(Stmt::Local {
                names: vec![name.clone()],
                attribs: vec![None],
                values: vec![],
                line,
            });
            out.push(Stmt::Assign {
                targets: vec![Expr::Name(name)],
                values: vec![Expr::Function(body)],
                line,
            });
            return Ok(());
        }

        let mut names = Vec::new();
        let mut attribs = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if matches!(self.current().kind, TokenKind::Lt) {
                self.advance();
                let attrib_name = self.expect_name()?;
                self.expect(TokenKind::Gt)?;
                match attrib_name.as_str() {
                    "const" => Some(LocalAttrib::Const),
                    "close" => Some(LocalAttrib::Close),
                    other => return Err(self.err(format!("unknown attribute '{other}'"))),
                }
            } else {
                None
            };
            self.const_scopes
                .last_mut()
                .unwrap()
                .push((name.clone(), attrib == Some(LocalAttrib::Const)));
            names.push(name);
            attribs.push(attrib);
            if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        let values = if matches!(self.current().kind, TokenKind::Assign) {
            self.advance();
            self.parse_explist()?
        } else {
            Vec::new()
        };
        out.push(Stmt::Local {
            names,
            attribs,
            values,
            line,
        });
        Ok(())
    }

    fn parse_expr_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let first = self.parse_suffixed()?;
        if matches!(self.current().kind, TokenKind::Assign | TokenKind::Comma) {
            let mut targets = vec![first];
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                targets.push(self.parse_suffixed()?);
            }
            self.expect(TokenKind::Assign)?;
            for target in &targets {
                match target {
                    Expr::Name(n) => {
                        if self.is_const_name(n) {
                            return Err(
                                self.err(format!("attempt to assign to const variable '{n}'"))
                            );
                        }
                    }
                    Expr::Field { .. } | Expr::Index { .. } => {}
                    _ => return Err(self.err("cannot assign to this expression")),
                }
            }
            let values = self.parse_explist()?;
            Ok(Stmt::Assign {
                targets,
                values,
                line,
            })
        } else if matches!(first, Expr::Call { .. } | Expr::MethodCall { .. }) {
            Ok(Stmt::Call(first))
        } else {
            Err(self.err("syntax error (statement has no effect)"))
        }
    }

    fn parse_explist(&mut self) -> PResult<Vec<Expr>> {
        let mut list = vec![self.parse_expr(1)?];
        while matches!(self.current().kind, TokenKind::Comma) {
            self.advance();
            list.push(self.parse_expr(1)?);
        }
        Ok(list)
    }

    fn parse_funcbody(
        &mut self,
        is_method: bool,
        name: Option<String>,
    ) -> PResult<Rc<FunctionBody>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut has_varargs = false;
        if !matches!(self.current().kind, TokenKind::RParen) {
            loop {
                if matches!(self.current().kind, TokenKind::Ellipsis) {
                    self.advance();
                    has_varargs = true;
                    break;
                }
                params.push(self.expect_name()?);
                if matches!(self.current().kind, TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(Rc::new(FunctionBody {
            params,
            has_varargs,
            body: Rc::new(body),
            name,
        }))
    }

    // ---- expressions ----

    fn parse_expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((op, prec, right_assoc)) = peek_binop(&self.current().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let right = self.parse_expr(next_min)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.current().kind {
            TokenKind::Not => Some(UnOpKind::Not),
            TokenKind::Hash => Some(UnOpKind::Len),
            TokenKind::Minus => Some(UnOpKind::Neg),
            TokenKind::Tilde => Some(UnOpKind::BNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_expr(UNARY_PREC)?;
            return Ok(Expr::UnOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_suffixed()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.current().kind.clone() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::True)
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::False)
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(Rc::from(s)))
            }
            TokenKind::Ellipsis => {
                self.advance();
                Ok(Expr::VarArg)
            }
            TokenKind::Function => {
                self.advance();
                let body = self.parse_funcbody(false, None)?;
                Ok(Expr::Function(body))
            }
            TokenKind::LBrace => self.parse_table_constructor(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(1)?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::Name(n) => {
                self.advance();
                Ok(Expr::Name(n))
            }
            other => Err(self.err(format!("unexpected symbol near '{:?}'", other))),
        }
    }

    fn parse_suffixed(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_name()?;
                    expr = Expr::Field {
                        table: Box::new(expr),
                        field,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr(1)?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        table: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.parse_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        method,
                        args,
                    };
                }
                TokenKind::LParen | TokenKind::Str(_) | TokenKind::LBrace => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        match self.current().kind.clone() {
            TokenKind::LParen => {
                self.advance();
                let args = if matches!(self.current().kind, TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.parse_explist()?
                };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::LBrace => Ok(vec![self.parse_table_constructor()?]),
            TokenKind::Str(s) => {
                self.advance();
                Ok(vec![Expr::Str(Rc::from(s))])
            }
            _ => Err(self.err("function arguments expected")),
        }
    }

    fn parse_table_constructor(&mut self) -> PResult<Expr> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !matches!(self.current().kind, TokenKind::RBrace) {
            let field = if matches!(self.current().kind, TokenKind::LBracket) {
                self.advance();
                let key = self.parse_expr(1)?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr(1)?;
                (Some(key), value)
            } else if matches!(self.current().kind, TokenKind::Name(_))
                && matches!(self.peek_kind(1), TokenKind::Assign)
            {
                let name = self.expect_name()?;
                self.advance(); // '='
                let value = self.parse_expr(1)?;
                (Some(Expr::Str(Rc::from(name.into_bytes()))), value)
            } else {
                let value = self.parse_expr(1)?;
                (None, value)
            };
            fields.push(field);
            if matches!(self.current().kind, TokenKind::Comma | TokenKind::Semi) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Table(fields))
    }
}

const UNARY_PREC: u8 = 11;

fn display_funcname(expr: &Expr) -> String {
    match expr {
        Expr::Name(n) => n.clone(),
        Expr::Field { table, field } => format!("{}.{}", display_funcname(table), field),
        _ => "?".to_string(),
    }
}

/// Returns `(operator, left-binding-precedence, is-right-associative)` for
/// the current token if it is a binary operator (spec §4.2 precedence
/// table).
fn peek_binop(kind: &TokenKind) -> Option<(BinOpKind, u8, bool)> {
    Some(match kind {
        TokenKind::Or => (BinOpKind::Or, 1, false),
        TokenKind::And => (BinOpKind::And, 2, false),
        TokenKind::Lt => (BinOpKind::Lt, 3, false),
        TokenKind::Gt => (BinOpKind::Gt, 3, false),
        TokenKind::Le => (BinOpKind::Le, 3, false),
        TokenKind::Ge => (BinOpKind::Ge, 3, false),
        TokenKind::Eq => (BinOpKind::Eq, 3, false),
        TokenKind::Ne => (BinOpKind::Ne, 3, false),
        TokenKind::Pipe => (BinOpKind::BOr, 4, false),
        TokenKind::Tilde => (BinOpKind::BXor, 5, false),
        TokenKind::Amp => (BinOpKind::BAnd, 6, false),
        TokenKind::ShiftLeft => (BinOpKind::Shl, 7, false),
        TokenKind::ShiftRight => (BinOpKind::Shr, 7, false),
        TokenKind::DotDot => (BinOpKind::Concat, 8, true),
        TokenKind::Plus => (BinOpKind::Add, 9, false),
        TokenKind::Minus => (BinOpKind::Sub, 9, false),
        TokenKind::Star => (BinOpKind::Mul, 10, false),
        TokenKind::Slash => (BinOpKind::Div, 10, false),
        TokenKind::SlashSlash => (BinOpKind::IDiv, 10, false),
        TokenKind::Percent => (BinOpKind::Mod, 10, false),
        TokenKind::Caret => (BinOpKind::Pow, 12, true),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Block {
        parse(src).unwrap_or_else(|e| panic!("parse failed for {src:?}: {e}"))
    }

    #[test]
    fn parses_numeric_for_loop() {
        let block = parse_ok("for i = 1, 3 do print(i) end");
        assert_eq!(block.stmts.len(), 1);
        assert!(matches!(block.stmts[0], Stmt::NumericFor { .. }));
    }

    #[test]
    fn unary_minus_binds_looser_than_pow() {
        let block = parse_ok("return -2^2");
        match &block.stmts[0] {
            Stmt::Return { values } => match &values[0] {
                Expr::UnOp {
                    op: UnOpKind::Neg,
                    operand,
                } => {
                    assert!(matches!(
                        **operand,
                        Expr::BinOp {
                            op: BinOpKind::Pow,
                            ..
                        }
                    ));
                }
                other => panic!("expected unary neg, got {other:?}"),
            },
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn concat_is_right_associative() {
        let block = parse_ok(r#"return "a" .. "b" .. "c""#);
        match &block.stmts[0] {
            Stmt::Return { values } => match &values[0] {
                Expr::BinOp {
                    op: BinOpKind::Concat,
                    left,
                    right,
                } => {
                    assert!(matches!(**left, Expr::Str(_)));
                    assert!(matches!(
                        **right,
                        Expr::BinOp {
                            op: BinOpKind::Concat,
                            ..
                        }
                    ));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn method_call_desugars_with_implicit_self() {
        let block = parse_ok("function obj:greet() return self end");
        match &block.stmts[0] {
            Stmt::Assign { values, .. } => match &values[0] {
                Expr::Function(body) => {
                    assert_eq!(body.params[0], "self");
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn local_function_declares_before_body() {
        let block = parse_ok("local function f() return f() end");
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(block.stmts[0], Stmt::Local { .. }));
        assert!(matches!(block.stmts[1], Stmt::Assign { .. }));
    }

    #[test]
    fn assignment_to_nonlvalue_fails() {
        assert!(parse("1 = 2").is_err());
    }

    #[test]
    fn table_constructor_keys() {
        let block = parse_ok(r#"return {1, 2, x = 3, [4+0] = 5}"#);
        match &block.stmts[0] {
            Stmt::Return { values } => match &values[0] {
                Expr::Table(fields) => {
                    assert_eq!(fields.len(), 4);
                    assert!(fields[0].0.is_none());
                    assert!(matches!(&fields[2].0, Some(Expr::Str(s)) if &**s == b"x"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn const_attribute_parses() {
        let block = parse_ok("local x <const> = 1");
        match &block.stmts[0] {
            Stmt::Local { attribs, .. } => {
                assert_eq!(attribs[0], Some(LocalAttrib::Const));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reassigning_const_local_fails() {
        assert!(parse("local x <const> = 1\nx = 2").is_err());
    }

    #[test]
    fn inner_non_const_shadow_of_outer_const_is_assignable() {
        // The inner `local x` (no attribute) shadows the outer `<const> x`
        // for the rest of the `do` block, so `x = 3` targets the shadow.
        assert!(parse("local x <const> = 1\ndo local x = 2\nx = 3 end").is_ok());
    }
}
