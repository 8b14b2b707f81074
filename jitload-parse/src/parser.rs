#![forbid(unsafe_code)]

use std::mem;

use jitload_ast::{
    join, span_between, AssignStmt, AttributeDecl, BinOp, CallArg, ClassDef, Def, Expr, ExprKind, Ident, IfStmt,
    Param, ReturnStmt, Span, Stmt, TypeExpr, UnaryOp,
};
use jitload_lex::{Token, TokenKind};

use crate::error::ParseError;

/// Recursive-descent parser over a lexed token stream.
///
/// The cursor methods (`peek_kind`, `at`, `next`, `next_if`, `expect`) are
/// public so callers can consume line-oriented headers themselves before
/// handing the rest of the stream to `parse_function` / `parse_class`.
pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    /// Parse one `def`. With `is_method`, the first parameter must be `self`.
    pub fn parse_function(&mut self, is_method: bool) -> Result<Def, ParseError> {
        let start = self.expect(TokenKind::KwDef)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        let rp = self.expect(TokenKind::RParen)?;

        if is_method && params.first().is_none_or(|p| p.name.node != "self") {
            return Err(ParseError {
                message: format!(
                    "method `{}` must take `self` as its first parameter",
                    name.node
                ),
                span: join(name.span, rp.span),
            });
        }

        let ret = if self.next_if(TokenKind::Arrow) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let colon = self.expect(TokenKind::Colon)?;
        let (body, body_span) = self.parse_suite(colon.span)?;
        Ok(Def {
            span: join(start.span, body_span),
            name,
            params,
            ret,
            body,
        })
    }

    /// Parse one `class` whose body holds method definitions, attribute
    /// declarations (`name : Type`) and `pass`.
    pub fn parse_class(&mut self) -> Result<ClassDef, ParseError> {
        let start = self.expect(TokenKind::KwClass)?;
        let name = self.expect_ident()?;

        // Base list is accepted for compatibility and otherwise ignored.
        if self.next_if(TokenKind::LParen) {
            while !self.at(TokenKind::RParen) {
                self.parse_type_expr()?;
                if !self.next_if(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        let indent = self.expect(TokenKind::Indent)?;

        let mut defs = Vec::new();
        let mut attributes = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dedent) => {
                    let dedent = self.expect(TokenKind::Dedent)?;
                    return Ok(ClassDef {
                        span: join(start.span, dedent.span),
                        name,
                        attributes,
                        defs,
                    });
                }
                Some(TokenKind::KwDef) => defs.push(self.parse_function(true)?),
                Some(TokenKind::KwPass) => {
                    self.next();
                    self.expect_newline()?;
                }
                Some(TokenKind::Ident(_)) => {
                    let attr = self.expect_ident()?;
                    self.expect(TokenKind::Colon)?;
                    let ty = self.parse_type_expr()?;
                    self.expect_newline()?;
                    attributes.push(AttributeDecl {
                        span: join(attr.span, ty.span),
                        name: attr,
                        ty,
                    });
                }
                Some(TokenKind::Eof) | None => {
                    return Err(ParseError {
                        message: "unterminated class body; expected dedent".to_string(),
                        span: indent.span,
                    });
                }
                Some(other) => {
                    return Err(ParseError {
                        message: format!(
                            "expected a method or attribute declaration in class body, found {}",
                            other.describe()
                        ),
                        span: self.peek_span(),
                    });
                }
            }
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident()?;
            let ty = if self.next_if(TokenKind::Colon) {
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            let span = ty.as_ref().map_or(name.span, |t| join(name.span, t.span));
            params.push(Param { span, name, ty });

            if self.next_if(TokenKind::Comma) {
                if self.at(TokenKind::RParen) {
                    break;
                }
                continue;
            }
            break;
        }
        Ok(params)
    }

    /// `NEWLINE INDENT stmt+ DEDENT` after a `:`.
    fn parse_suite(&mut self, colon: Span) -> Result<(Vec<Stmt>, Span), ParseError> {
        self.expect(TokenKind::Newline)?;
        let indent = self.expect(TokenKind::Indent)?;

        let mut stmts = Vec::new();
        loop {
            if self.at(TokenKind::Dedent) {
                let dedent = self.expect(TokenKind::Dedent)?;
                return Ok((stmts, join(colon, dedent.span)));
            }
            if self.at(TokenKind::Eof) {
                return Err(ParseError {
                    message: "unterminated block; expected dedent".to_string(),
                    span: indent.span,
                });
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwReturn) => {
                let start = self.expect(TokenKind::KwReturn)?;
                let expr = if self.at(TokenKind::Newline) {
                    None
                } else {
                    Some(self.parse_expr_list()?)
                };
                self.expect_newline()?;
                let span = expr.as_ref().map_or(start.span, |e| join(start.span, e.span));
                Ok(Stmt::Return(ReturnStmt { span, expr }))
            }
            Some(TokenKind::KwIf) => {
                let start = self.expect(TokenKind::KwIf)?;
                Ok(Stmt::If(self.parse_if_rest(start.span)?))
            }
            Some(TokenKind::KwPass) => {
                let tok = self.expect(TokenKind::KwPass)?;
                self.expect_newline()?;
                Ok(Stmt::Pass(tok.span))
            }
            Some(TokenKind::Ident(_))
                if matches!(self.peek_kind_n(1), Some(TokenKind::Eq | TokenKind::Colon)) =>
            {
                Ok(Stmt::Assign(self.parse_assign_stmt()?))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect_newline()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_assign_stmt(&mut self) -> Result<AssignStmt, ParseError> {
        let target = self.expect_ident()?;
        let ty = if self.next_if(TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr_list()?;
        self.expect_newline()?;
        let span = join(target.span, expr.span);
        Ok(AssignStmt {
            span,
            target,
            ty,
            expr,
        })
    }

    /// Everything after `if` / `elif`; `elif` chains nest into the else branch.
    fn parse_if_rest(&mut self, start: Span) -> Result<IfStmt, ParseError> {
        let cond = self.parse_expr()?;
        let colon = self.expect(TokenKind::Colon)?;
        let (then_body, mut span) = self.parse_suite(colon.span)?;
        span = join(start, span);

        let else_body = match self.peek_kind() {
            Some(TokenKind::KwElif) => {
                let elif = self.expect(TokenKind::KwElif)?;
                let nested = self.parse_if_rest(elif.span)?;
                span = join(span, nested.span);
                vec![Stmt::If(nested)]
            }
            Some(TokenKind::KwElse) => {
                self.expect(TokenKind::KwElse)?;
                let colon = self.expect(TokenKind::Colon)?;
                let (body, else_span) = self.parse_suite(colon.span)?;
                span = join(span, else_span);
                body
            }
            _ => Vec::new(),
        };

        Ok(IfStmt {
            span,
            cond,
            then_body,
            else_body,
        })
    }

    pub fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let first = if self.at(TokenKind::KwNone) {
            let tok = self.expect(TokenKind::KwNone)?;
            Ident::new(tok.span, "None".to_string())
        } else {
            self.expect_ident()?
        };
        let mut span = first.span;
        let mut path = vec![first];
        while self.next_if(TokenKind::Dot) {
            let seg = self.expect_ident()?;
            span = join(span, seg.span);
            path.push(seg);
        }

        let mut args = Vec::new();
        if self.next_if(TokenKind::LBracket) {
            loop {
                args.push(self.parse_type_expr()?);
                if !self.next_if(TokenKind::Comma) {
                    break;
                }
            }
            let rb = self.expect(TokenKind::RBracket)?;
            span = join(span, rb.span);
        }

        Ok(TypeExpr { span, path, args })
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or_expr()
    }

    /// `a, b, c` without parentheses, as allowed after `return` and `=`.
    fn parse_expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_expr()?;
        if !self.at(TokenKind::Comma) {
            return Ok(first);
        }
        let mut span = first.span;
        let mut items = vec![first];
        while self.next_if(TokenKind::Comma) {
            if self.at(TokenKind::Newline) {
                break;
            }
            let item = self.parse_expr()?;
            span = join(span, item.span);
            items.push(item);
        }
        Ok(Expr {
            span,
            kind: ExprKind::Tuple(items),
        })
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.next_if(TokenKind::KwOr) {
            let right = self.parse_and_expr()?;
            left = binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not_expr()?;
        while self.next_if(TokenKind::KwAnd) {
            let right = self.parse_not_expr()?;
            left = binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::KwNot) {
            let t = self.expect(TokenKind::KwNot)?;
            let expr = self.parse_not_expr()?;
            return Ok(Expr {
                span: join(t.span, expr.span),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                },
            });
        }
        self.parse_cmp_expr()
    }

    fn parse_cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add_expr()?;
        let Some(op) = self.peek_kind().and_then(cmp_op) else {
            return Ok(left);
        };
        self.next();
        let right = self.parse_add_expr()?;
        let expr = binary(left, op, right);

        if self.peek_kind().and_then(cmp_op).is_some() {
            return Err(ParseError {
                message: "chained comparisons are not supported".to_string(),
                span: self.peek_span(),
            });
        }

        Ok(expr)
    }

    fn parse_add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_mul_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let right = self.parse_unary_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Minus) {
            let t = self.expect(TokenKind::Minus)?;
            let expr = self.parse_unary_expr()?;
            return Ok(Expr {
                span: join(t.span, expr.span),
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                },
            });
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.next_if(TokenKind::Dot) {
                let member = self.expect_ident()?;
                expr = Expr {
                    span: join(expr.span, member.span),
                    kind: ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                };
                continue;
            }

            if self.next_if(TokenKind::LParen) {
                let args = self.parse_args()?;
                let rp = self.expect(TokenKind::RParen)?;
                expr = Expr {
                    span: join(expr.span, rp.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
                continue;
            }

            if self.next_if(TokenKind::LBracket) {
                let mut index = vec![self.parse_expr()?];
                while self.next_if(TokenKind::Comma) {
                    index.push(self.parse_expr()?);
                }
                let rb = self.expect(TokenKind::RBracket)?;
                expr = Expr {
                    span: join(expr.span, rb.span),
                    kind: ExprKind::Subscript {
                        base: Box::new(expr),
                        index,
                    },
                };
                continue;
            }

            break;
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        let mut args: Vec<CallArg> = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            // Named arg: Ident '=' expr
            if matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
                && matches!(self.peek_kind_n(1), Some(TokenKind::Eq))
            {
                let name = self.expect_ident()?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr()?;
                args.push(CallArg::Named { name, value });
            } else {
                if args.iter().any(|a| matches!(a, CallArg::Named { .. })) {
                    return Err(ParseError {
                        message: "positional argument follows keyword argument".to_string(),
                        span: self.peek_span(),
                    });
                }
                args.push(CallArg::Positional(self.parse_expr()?));
            }

            if self.next_if(TokenKind::Comma) {
                if self.at(TokenKind::RParen) {
                    break;
                }
                continue;
            }
            break;
        }
        Ok(args)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        let tok = self.expect_any()?;
        let kind = match tok.kind {
            TokenKind::Ident(name) => ExprKind::Ident(Ident::new(tok.span, name)),
            TokenKind::Int(n) => ExprKind::IntLit(n),
            TokenKind::Float(x) => ExprKind::FloatLit(x),
            TokenKind::String(s) => ExprKind::StringLit(s),
            TokenKind::KwTrue => ExprKind::BoolLit(true),
            TokenKind::KwFalse => ExprKind::BoolLit(false),
            TokenKind::KwNone => ExprKind::NoneLit,
            TokenKind::LParen => {
                if self.at(TokenKind::RParen) {
                    let rp = self.expect(TokenKind::RParen)?;
                    return Ok(Expr {
                        span: join(tok.span, rp.span),
                        kind: ExprKind::Tuple(Vec::new()),
                    });
                }
                let first = self.parse_expr()?;
                if !self.at(TokenKind::Comma) {
                    self.expect(TokenKind::RParen)?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.next_if(TokenKind::Comma) {
                    if self.at(TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                let rp = self.expect(TokenKind::RParen)?;
                return Ok(Expr {
                    span: join(tok.span, rp.span),
                    kind: ExprKind::Tuple(items),
                });
            }
            other => {
                return Err(ParseError {
                    message: format!("expected an expression, found {}", other.describe()),
                    span: tok.span,
                });
            }
        };
        Ok(Expr {
            span: tok.span,
            kind,
        })
    }

    pub fn expect_newline(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::Newline).map(|_| ())
    }

    pub fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident::new(tok.span, name)),
            other => Err(ParseError {
                message: format!("expected identifier, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    /// Consume the next token if it has the same kind as `expected`
    /// (payloads are ignored), otherwise fail without consuming.
    pub fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        if self.at(expected.clone()) {
            return self.expect_any();
        }
        let found = self
            .peek_kind()
            .map_or_else(|| "end of input".to_string(), TokenKind::describe);
        Err(ParseError {
            message: format!("expected {}, found {found}", expected.describe()),
            span: self.peek_span(),
        })
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        self.next().ok_or_else(|| ParseError {
            message: "unexpected end of input".to_string(),
            span: self.peek_span(),
        })
    }

    /// Consume the next token when it matches `kind`.
    pub fn next_if(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    pub fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    pub fn at_eof(&self) -> bool {
        self.peek_kind().is_none_or(|k| *k == TokenKind::Eof)
    }

    /// Advance one token. The cursor never moves past `Eof`.
    pub fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        if tok.kind != TokenKind::Eof {
            self.idx += 1;
        }
        Some(tok)
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.idx)
    }

    pub fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    pub fn peek_span(&self) -> Span {
        self.peek()
            .or(self.tokens.last())
            .map_or_else(|| span_between(0, 0), |t| t.span)
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr {
        span: join(left.span, right.span),
        kind: ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

fn cmp_op(kind: &TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::EqEq => Some(BinOp::Eq),
        TokenKind::Neq => Some(BinOp::Ne),
        TokenKind::Lt => Some(BinOp::Lt),
        TokenKind::Gt => Some(BinOp::Gt),
        TokenKind::Le => Some(BinOp::Le),
        TokenKind::Ge => Some(BinOp::Ge),
        _ => None,
    }
}
