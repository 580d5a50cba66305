//! Recursive-descent parser producing an [`Expr`] AST.
//!
//! Precedence, loosest to tightest:
//! `||` < `&&` < `==` `!=` < `<` `<=` `>` `>=` < `+` `-` < `*` `/` `%`
//! < unary `-` `!` < postfix `.field` / `[index]`.

use serde_json::Value;

use crate::core::ast::{BinaryOp, Expr, UnaryOp};
use crate::core::lexer::{Token, TokenKind, tokenize};
use crate::error::{ExpressionError, ExpressionResult};

/// Parse an expression source string into an AST.
pub fn parse(source: &str) -> ExpressionResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: source.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(ExpressionError::syntax(
            tok.offset,
            format!("unexpected trailing token {:?}", tok.kind),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| t.kind == *kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ExpressionResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(ExpressionError::syntax(self.offset(), format!("expected {what}")))
        }
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.source_len, |t| t.offset)
    }

    fn parse_or(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ExpressionResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExpressionResult<Expr> {
        if self.eat(&TokenKind::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        if self.eat(&TokenKind::Bang) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ExpressionResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let offset = self.offset();
                match self.advance().map(|t| t.kind) {
                    Some(TokenKind::Ident(name)) => {
                        expr = Expr::Property {
                            object: Box::new(expr),
                            property: name,
                        };
                    }
                    _ => {
                        return Err(ExpressionError::syntax(offset, "expected field name after '.'"));
                    }
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_or()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ExpressionResult<Expr> {
        let offset = self.offset();
        match self.advance().map(|t| t.kind) {
            Some(TokenKind::Int(i)) => Ok(Expr::Literal(Value::from(i))),
            Some(TokenKind::Float(f)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(TokenKind::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(TokenKind::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(TokenKind::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(TokenKind::Null) => Ok(Expr::Literal(Value::Null)),
            Some(TokenKind::Ident(name)) => Ok(Expr::Identifier(name)),
            Some(TokenKind::LParen) => {
                let expr = self.parse_or()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            Some(other) => Err(ExpressionError::syntax(
                offset,
                format!("unexpected token {other:?}"),
            )),
            None => Err(ExpressionError::syntax(offset, "unexpected end of expression")),
        }
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}
