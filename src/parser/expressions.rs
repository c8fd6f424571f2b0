//! Expressions
//!
//! Precedence, lowest first:
//!
//! ```text
//! or
//! and
//! not
//! comparison | is [not] … | is one of … | is [strictly] between … and …
//! + -
//! * / %
//! **            (right associative)
//! unary -
//! postfix . [ ]
//! ```

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::Parser;
use crate::lexer::{Keyword, TokenKind, TokenValue};

impl<'a> Parser<'a> {
    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check_keyword(Keyword::Or) {
            let span = self.span();
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right, span);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check_keyword(Keyword::And) {
            let span = self.span();
            self.advance();
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right, span);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.check_keyword(Keyword::Not) {
            let span = self.span();
            self.advance();
            self.enter_nesting()?;
            let operand = self.parse_not()?;
            self.leave_nesting();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive()?;
        let span = self.span();

        let symbolic = match self.peek().kind {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Gte => Some(BinaryOp::Gte),
            TokenKind::Lte => Some(BinaryOp::Lte),
            _ => None,
        };
        if let Some(op) = symbolic {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(binary(op, left, right, span));
        }

        if !self.eat_keyword(Keyword::Is) {
            return Ok(left);
        }

        if self.eat_keyword(Keyword::Not) {
            if self.eat_keyword(Keyword::Equal) {
                self.expect_keyword(Keyword::To)?;
            }
            let right = self.parse_additive()?;
            return Ok(binary(BinaryOp::NotEq, left, right, span));
        }
        if self.eat_keyword(Keyword::Equal) {
            self.expect_keyword(Keyword::To)?;
            let right = self.parse_additive()?;
            return Ok(binary(BinaryOp::Eq, left, right, span));
        }
        if self.eat_keyword(Keyword::Greater) {
            self.expect_keyword(Keyword::Than)?;
            let right = self.parse_additive()?;
            return Ok(binary(BinaryOp::Gt, left, right, span));
        }
        if self.eat_keyword(Keyword::Less) {
            self.expect_keyword(Keyword::Than)?;
            let right = self.parse_additive()?;
            return Ok(binary(BinaryOp::Lt, left, right, span));
        }
        if self.eat_keyword(Keyword::At) {
            let op = if self.eat_keyword(Keyword::Least) {
                BinaryOp::Gte
            } else {
                self.expect_keyword(Keyword::Most)?;
                BinaryOp::Lte
            };
            let right = self.parse_additive()?;
            return Ok(binary(op, left, right, span));
        }
        if self.eat_keyword(Keyword::One) {
            self.expect_keyword(Keyword::Of)?;
            let options = self.parse_additive()?;
            return Ok(Expr::OneOf {
                value: Box::new(left),
                options: Box::new(options),
                span,
            });
        }
        let strict = self.eat_keyword(Keyword::Strictly);
        if self.eat_keyword(Keyword::Between) {
            let low = self.parse_additive()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                value: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                strict,
                span,
            });
        }
        if strict {
            return Err(self.unexpected("Expected 'between' after 'strictly'"));
        }

        let right = self.parse_additive()?;
        Ok(binary(BinaryOp::Eq, left, right, span))
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right, span);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_exponent()?;
            left = binary(op, left, right, span);
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> ParseResult<Expr> {
        let base = self.parse_unary()?;
        if self.check(TokenKind::Power) {
            let span = self.span();
            self.advance();
            self.enter_nesting()?;
            let exponent = self.parse_exponent()?;
            self.leave_nesting();
            return Ok(binary(BinaryOp::Pow, base, exponent, span));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Minus) {
            let span = self.span();
            self.advance();
            self.enter_nesting()?;
            let operand = self.parse_unary()?;
            self.leave_nesting();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenKind::Dot) {
                let span = self.span();
                self.advance();
                let (field, _) = self.word("field name after '.'")?;
                expr = Expr::Attr {
                    object: Box::new(expr),
                    field,
                    span,
                };
            } else if self.check(TokenKind::LBracket) {
                let span = self.span();
                self.advance();
                self.enter_nesting()?;
                let index = self.parse_expression()?;
                self.leave_nesting();
                self.expect(TokenKind::RBracket, "to close index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let token = self.peek().clone();
        let literal = match (&token.kind, &token.value) {
            (TokenKind::Number, TokenValue::Number(n)) => Some(Literal::Number(*n)),
            (TokenKind::String, TokenValue::Text(s)) => Some(Literal::Text(s.clone())),
            (TokenKind::Boolean, TokenValue::Bool(b)) => Some(Literal::Bool(*b)),
            (TokenKind::Null, _) => Some(Literal::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal { value, span });
        }

        match (&token.kind, &token.value) {
            (TokenKind::Ident, TokenValue::Ident(name)) => {
                self.advance();
                Ok(Expr::Name {
                    name: name.clone(),
                    span,
                })
            }
            (TokenKind::Keyword(k @ (Keyword::Input | Keyword::State | Keyword::Identity)), _) => {
                let root = match k {
                    Keyword::Input => ContextRoot::Input,
                    Keyword::State => ContextRoot::State,
                    _ => ContextRoot::Identity,
                };
                self.advance();
                Ok(Expr::Root { root, span })
            }
            (TokenKind::LParen, _) => {
                self.advance();
                self.enter_nesting()?;
                let inner = self.parse_expression()?;
                self.leave_nesting();
                self.expect(TokenKind::RParen, "to close '('")?;
                Ok(inner)
            }
            (TokenKind::LBracket, _) => self.parse_list(),
            (TokenKind::LBrace, _) => self.parse_record_literal(),
            (TokenKind::Keyword(Keyword::Call), _) => Err(ParseError::syntax(
                "Flow calls are only allowed on the right of 'let' or 'set'",
                &token,
            )),
            _ => Err(self.unexpected("Expected an expression")),
        }
    }

    fn parse_list(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::LBracket, "to open list")?;
        self.enter_nesting()?;
        let mut items = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                items.push(self.parse_expression()?);
                if !self.eat(TokenKind::Comma) || self.check(TokenKind::RBracket) {
                    break;
                }
            }
        }
        self.leave_nesting();
        self.expect(TokenKind::RBracket, "to close list")?;
        Ok(Expr::List { items, span })
    }

    fn parse_record_literal(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::LBrace, "to open record")?;
        self.enter_nesting()?;
        let mut fields: Vec<FieldAssign> = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let (name, field_span) = self.field_name("record key")?;
                if fields.iter().any(|f| f.name == name) {
                    return Err(ParseError::duplicate(
                        format!("Duplicate key '{}'", name),
                        &name,
                        field_span.line,
                        field_span.column,
                    ));
                }
                self.expect(TokenKind::Colon, "after record key")?;
                let value = self.parse_expression()?;
                fields.push(FieldAssign {
                    name,
                    value,
                    span: field_span,
                });
                if !self.eat(TokenKind::Comma) || self.check(TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.leave_nesting();
        self.expect(TokenKind::RBrace, "to close record")?;
        Ok(Expr::Record { fields, span })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}
