//! Statements and the block-shaped right-hand sides of `let` / `set`

use std::collections::HashSet;

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::Parser;
use crate::lexer::{Keyword, TokenKind};
use crate::value::Decimal;

impl<'a> Parser<'a> {
    /// Indented statement block after a header.
    pub(crate) fn parse_block(&mut self, header: &str) -> ParseResult<Vec<Stmt>> {
        self.open_block(header)?;
        let mut body = Vec::new();
        while !self.close_block() {
            self.parse_statement(&mut body)?;
        }
        Ok(body)
    }

    /// Parse one statement line (or block) into `out`. `let:` blocks
    /// expand into several `Let` statements.
    pub(crate) fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> ParseResult<()> {
        let token = self.peek().clone();
        let TokenKind::Keyword(keyword) = token.kind else {
            return Err(self.unexpected("Expected a statement"));
        };
        let stmt = match keyword {
            Keyword::Let => {
                if self.peek_at(1).kind == TokenKind::Colon {
                    return self.parse_let_block(out);
                }
                self.parse_let()?
            }
            Keyword::Set => self.parse_set()?,
            Keyword::If => self.parse_if()?,
            Keyword::Repeat => self.parse_repeat()?,
            Keyword::For => self.parse_for_each()?,
            Keyword::Match => self.parse_match()?,
            Keyword::Parallel => self.parse_parallel()?,
            Keyword::Await => {
                let span = self.span();
                self.advance();
                let (name, _) = self.binding_name()?;
                self.end_line()?;
                Stmt::Await { name, span }
            }
            Keyword::Return | Keyword::Yield => {
                let span = self.span();
                self.advance();
                let value = self.parse_expression()?;
                self.end_line()?;
                if keyword == Keyword::Return {
                    Stmt::Return { value, span }
                } else {
                    Stmt::Yield { value, span }
                }
            }
            Keyword::Tick | Keyword::Advance => self.parse_advance_time()?,
            Keyword::Save => self.parse_save()?,
            Keyword::Find => self.parse_find()?,
            Keyword::Enqueue => {
                let span = self.span();
                self.advance();
                self.expect_keyword(Keyword::Job)?;
                let job = self.expect_named("job name")?;
                self.end_line()?;
                Stmt::Enqueue { job, span }
            }
            Keyword::Else => {
                return Err(ParseError::syntax(
                    "'else' must follow an 'if' block",
                    &token,
                ))
            }
            Keyword::When | Keyword::Otherwise => {
                return Err(ParseError::syntax(
                    format!("'{}' is only allowed inside 'match'", keyword.as_str()),
                    &token,
                ))
            }
            Keyword::Run => {
                return Err(ParseError::syntax(
                    "'run' is only allowed inside 'parallel'",
                    &token,
                ))
            }
            _ => return Err(self.unexpected("Expected a statement")),
        };
        out.push(stmt);
        Ok(())
    }

    /* ===================== let / set ===================== */

    fn parse_let(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Let)?;
        let (name, _) = self.binding_name()?;
        self.expect_keyword(Keyword::Is)?;

        if self.eat_keyword(Keyword::Async) {
            let call = self.parse_tool_call()?;
            return Ok(Stmt::AsyncLet { name, call, span });
        }
        if let Some(value) = self.parse_block_value()? {
            return Ok(Stmt::Let {
                name,
                value,
                constant: false,
                span,
            });
        }
        let value = self.parse_expression()?;
        let constant = self.eat_keyword(Keyword::Constant);
        self.end_line()?;
        Ok(Stmt::Let {
            name,
            value,
            constant,
            span,
        })
    }

    fn parse_let_block(&mut self, out: &mut Vec<Stmt>) -> ParseResult<()> {
        self.expect_keyword(Keyword::Let)?;
        self.open_block("let")?;
        while !self.close_block() {
            let span = self.span();
            let (name, _) = self.binding_name()?;
            self.expect_keyword(Keyword::Is)?;
            let value = self.parse_expression()?;
            let constant = self.eat_keyword(Keyword::Constant);
            self.end_line()?;
            out.push(Stmt::Let {
                name,
                value,
                constant,
                span,
            });
        }
        Ok(())
    }

    fn parse_set(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Set)?;
        let target = self.parse_target()?;

        if self.eat_keyword(Keyword::With) {
            let fields = self.parse_field_block("with", "field")?;
            return Ok(Stmt::SetWith {
                target,
                fields,
                span,
            });
        }

        self.expect_keyword(Keyword::Is)?;
        if let Some(value) = self.parse_block_value()? {
            return Ok(Stmt::Set {
                target,
                value,
                span,
            });
        }
        let value = self.parse_expression()?;
        self.end_line()?;
        Ok(Stmt::Set {
            target,
            value,
            span,
        })
    }

    /// `name`, `name.a.b` or `state.a.b`
    fn parse_target(&mut self) -> ParseResult<Target> {
        let span = self.span();
        let (root, mut path) = if self.eat_keyword(Keyword::State) {
            if !self.check(TokenKind::Dot) {
                return Err(self.unexpected("Expected '.' after 'state'"));
            }
            (TargetRoot::State, Vec::new())
        } else {
            let (name, _) = self.binding_name()?;
            (TargetRoot::Local, vec![name])
        };
        while self.eat(TokenKind::Dot) {
            let (field, _) = self.word("field name")?;
            path.push(field);
        }
        Ok(Target { root, path, span })
    }

    /// Tool call or `call flow` on the right of `is`; `None` when the value
    /// is a plain expression.
    fn parse_block_value(&mut self) -> ParseResult<Option<Expr>> {
        if self.check_keyword(Keyword::Call) {
            return self.parse_call_flow().map(Some);
        }
        if self.looks_like_tool_call() {
            return self.parse_tool_call().map(|call| Some(Expr::ToolCall(call)));
        }
        Ok(None)
    }

    /// A run of words ending in `:` at end of line.
    fn looks_like_tool_call(&self) -> bool {
        let mut offset = 0;
        while self.is_word_at(offset) {
            offset += 1;
        }
        offset > 0
            && self.peek_at(offset).kind == TokenKind::Colon
            && self.peek_at(offset + 1).kind == TokenKind::Newline
    }

    pub(crate) fn parse_tool_call(&mut self) -> ParseResult<ToolCall> {
        let span = self.span();
        let mut words = Vec::new();
        while let Some(word) = self.peek_word() {
            words.push(word.to_string());
            self.advance();
        }
        if words.is_empty() {
            return Err(self.unexpected("Expected a tool name"));
        }
        self.expect(TokenKind::Colon, "after tool name")?;
        self.expect(TokenKind::Newline, "after tool call header")?;

        let mut args = Vec::new();
        if self.check(TokenKind::Indent) {
            self.advance();
            self.depth += 1;
            args = self.parse_field_lines("tool field")?;
        }
        Ok(ToolCall {
            tool: words.join(" "),
            args,
            span,
        })
    }

    /// `call flow "x":` / `call pipeline "x":` with `input:` and `output:`
    fn parse_call_flow(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect_keyword(Keyword::Call)?;
        let kind = if self.eat_keyword(Keyword::Pipeline) {
            FlowKind::Pipeline
        } else {
            self.expect_keyword(Keyword::Flow)?;
            FlowKind::Flow
        };
        let target = self.expect_string(&format!("{} name", kind.as_str()))?;
        self.open_block(&format!("{} name", kind.as_str()))?;

        let mut args = None;
        let mut outputs = None;
        while !self.close_block() {
            if self.check_keyword(Keyword::Input) {
                let token = self.advance();
                if args.is_some() {
                    return Err(ParseError::syntax("Duplicate input block", &token));
                }
                args = Some(self.parse_field_block("input", "input")?);
            } else if self.check_keyword(Keyword::Output) {
                let token = self.advance();
                if outputs.is_some() {
                    return Err(ParseError::syntax("Duplicate output block", &token));
                }
                outputs = Some(self.parse_output_names()?);
            } else {
                return Err(self.unexpected("Expected 'input:' or 'output:'"));
            }
        }

        let missing = |section: &str| ParseError::Syntax {
            message: format!(
                "call {} \"{}\" requires an {} block",
                kind.as_str(),
                target,
                section
            ),
            line: span.line,
            column: span.column,
        };
        let args = args.ok_or_else(|| missing("input"))?;
        let outputs = outputs.ok_or_else(|| missing("output"))?;
        Ok(Expr::CallFlow {
            kind,
            target,
            args,
            outputs,
            span,
        })
    }

    fn parse_output_names(&mut self) -> ParseResult<Vec<Named>> {
        self.open_block("output")?;
        let mut outputs: Vec<Named> = Vec::new();
        while !self.close_block() {
            let (name, span) = self.word("output name")?;
            if outputs.iter().any(|o| o.name == name) {
                return Err(ParseError::duplicate(
                    format!("Duplicate output '{}'", name),
                    &name,
                    span.line,
                    span.column,
                ));
            }
            self.end_line()?;
            outputs.push(Named { name, span });
        }
        Ok(outputs)
    }

    /// `header:` block of `name is expr` lines.
    fn parse_field_block(&mut self, header: &str, what: &str) -> ParseResult<Vec<FieldAssign>> {
        self.open_block(header)?;
        self.parse_field_lines(what)
    }

    /// `name is expr` lines up to the end of the current block.
    fn parse_field_lines(&mut self, what: &str) -> ParseResult<Vec<FieldAssign>> {
        let mut fields: Vec<FieldAssign> = Vec::new();
        while !self.close_block() {
            let (name, span) = self.field_name(&format!("{} name", what))?;
            if fields.iter().any(|f| f.name == name) {
                return Err(ParseError::duplicate(
                    format!("Duplicate {} '{}'", what, name),
                    &name,
                    span.line,
                    span.column,
                ));
            }
            self.expect_keyword(Keyword::Is)?;
            let value = self.parse_expression()?;
            self.end_line()?;
            fields.push(FieldAssign { name, value, span });
        }
        Ok(fields)
    }

    /* ===================== control flow ===================== */

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::If)?;
        let condition = self.parse_expression()?;
        let then_body = self.parse_block("condition")?;

        let else_body = if self.check_keyword(Keyword::Else) {
            self.advance();
            if self.check_keyword(Keyword::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block("else")?
            }
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            condition,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_repeat(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Repeat)?;
        self.expect_keyword(Keyword::Up)?;
        self.expect_keyword(Keyword::To)?;
        let count = self.parse_expression()?;
        self.expect_keyword(Keyword::Times)?;
        let body = self.parse_block("times")?;
        Ok(Stmt::Repeat { count, body, span })
    }

    fn parse_for_each(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::For)?;
        self.expect_keyword(Keyword::Each)?;
        let (item, _) = self.binding_name()?;
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block("for each header")?;
        Ok(Stmt::ForEach {
            item,
            iterable,
            body,
            span,
        })
    }

    fn parse_match(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Match)?;
        let subject = self.parse_expression()?;
        self.open_block("match subject")?;

        let mut arms = Vec::new();
        let mut otherwise: Option<Vec<Stmt>> = None;
        while !self.close_block() {
            let token = self.peek().clone();
            if self.eat_keyword(Keyword::When) {
                if otherwise.is_some() {
                    return Err(ParseError::syntax("Unreachable case after otherwise", &token));
                }
                let pattern = self.parse_expression()?;
                let body = self.parse_block("when pattern")?;
                arms.push(MatchArm {
                    pattern,
                    body,
                    span: Span::new(token.line, token.column).in_source(self.options.source),
                });
            } else if self.eat_keyword(Keyword::Otherwise) {
                if otherwise.is_some() {
                    return Err(ParseError::syntax("Duplicate otherwise in match", &token));
                }
                otherwise = Some(self.parse_block("otherwise")?);
            } else {
                return Err(self.unexpected("Expected 'when' or 'otherwise'"));
            }
        }

        if arms.is_empty() {
            return Err(ParseError::Syntax {
                message: "Match must have at least one case".to_string(),
                line: span.line,
                column: span.column,
            });
        }
        Ok(Stmt::Match {
            subject,
            arms,
            otherwise,
            span,
        })
    }

    fn parse_parallel(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Parallel)?;
        self.open_block("parallel")?;

        let mut tasks: Vec<ParallelTask> = Vec::new();
        let mut seen = HashSet::new();
        while !self.close_block() {
            let task_span = self.span();
            if !self.eat_keyword(Keyword::Run) {
                return Err(self.unexpected("Expected 'run \"<task name>\":' inside parallel"));
            }
            let name = self.expect_string("task name")?;
            if !seen.insert(name.clone()) {
                return Err(ParseError::duplicate(
                    format!("Task \"{}\" is declared more than once.", name),
                    &name,
                    task_span.line,
                    task_span.column,
                ));
            }
            let body = self.parse_block("task name")?;
            tasks.push(ParallelTask {
                name,
                body,
                span: task_span,
            });
        }

        Ok(Stmt::Parallel { tasks, span })
    }

    /* ===================== effects ===================== */

    /// `tick [amount]` or `advance time by <amount>`
    fn parse_advance_time(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let amount = if self.eat_keyword(Keyword::Tick) {
            if self.check(TokenKind::Newline) {
                Expr::Literal {
                    value: Literal::Number(Decimal::ONE),
                    span,
                }
            } else {
                self.parse_expression()?
            }
        } else {
            self.expect_keyword(Keyword::Advance)?;
            self.expect_keyword(Keyword::Time)?;
            self.expect_keyword(Keyword::By)?;
            self.parse_expression()?
        };
        self.end_line()?;
        Ok(Stmt::AdvanceTime { amount, span })
    }

    fn parse_save(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Save)?;
        let record = self.expect_named("record name")?;
        self.expect_keyword(Keyword::With)?;
        let value = self.parse_expression()?;
        let binding = self.parse_as_binding()?;
        self.end_line()?;
        Ok(Stmt::Save {
            record,
            value,
            binding,
            span,
        })
    }

    fn parse_find(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect_keyword(Keyword::Find)?;
        let record = self.expect_named("record name")?;
        self.expect_keyword(Keyword::Where)?;
        let predicate = self.parse_expression()?;
        let binding = self.parse_as_binding()?;
        self.end_line()?;
        Ok(Stmt::Find {
            record,
            predicate,
            binding,
            span,
        })
    }

    fn parse_as_binding(&mut self) -> ParseResult<Option<String>> {
        if self.eat_keyword(Keyword::As) {
            return Ok(Some(self.binding_name()?.0));
        }
        Ok(None)
    }
}
