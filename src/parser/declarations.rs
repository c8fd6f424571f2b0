//! Top-level declarations

use std::collections::HashSet;

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::Parser;
use crate::lexer::{Keyword, TokenKind, TokenValue};
use crate::schema::FieldConstraint;
use crate::value::Decimal;

impl<'a> Parser<'a> {
    pub(crate) fn parse_declaration(&mut self) -> ParseResult<Decl> {
        let token = self.peek().clone();
        let TokenKind::Keyword(keyword) = token.kind else {
            return Err(self.unexpected("Expected a declaration"));
        };
        match keyword {
            Keyword::Use | Keyword::Include => self.parse_use(),
            Keyword::Alias => self.parse_alias(),
            Keyword::Record => self.parse_record(),
            Keyword::Flow | Keyword::Pipeline => self.parse_flow(),
            Keyword::Tool => self.parse_tool(),
            Keyword::Ai => self.parse_ai(),
            Keyword::Agent => self.parse_agent(),
            Keyword::Team => self.parse_team(),
            Keyword::Policy => self.parse_policy(),
            Keyword::Job => self.parse_job(),
            Keyword::Prompt => self.parse_prompt(),
            Keyword::Page => self.parse_page(),
            Keyword::Route => self.parse_route(),
            Keyword::Spec => Err(ParseError::syntax(
                "'spec' must be the first line of the program",
                &token,
            )),
            _ => Err(self.unexpected("Expected a declaration")),
        }
    }

    /// `<keyword> "name"` at the start of a declaration.
    fn decl_header(&mut self, what: &str) -> ParseResult<(String, Span)> {
        let span = self.span();
        self.advance();
        let name = self.expect_string(&format!("{} name", what))?;
        Ok((name, span))
    }

    /// `key is "value"` line; the key has already been consumed.
    fn string_property(&mut self, key: &str) -> ParseResult<String> {
        self.expect_keyword(Keyword::Is)?;
        let value = self.expect_string(key)?;
        self.end_line()?;
        Ok(value)
    }

    fn named_property(&mut self, key: &str) -> ParseResult<Named> {
        self.expect_keyword(Keyword::Is)?;
        let named = self.expect_named(key)?;
        self.end_line()?;
        Ok(named)
    }

    fn unknown_property(&self, decl: &str, key: &str, span: Span) -> ParseError {
        ParseError::Syntax {
            message: format!("Unknown {} property '{}'", decl, key),
            line: span.line,
            column: span.column,
        }
    }

    /* ===================== use / include / alias ===================== */

    fn parse_use(&mut self) -> ParseResult<Decl> {
        let span = self.span();
        let include = self.check_keyword(Keyword::Include);
        self.advance();
        let module = self.expect_string("module name")?;
        let alias = if !include && self.eat_keyword(Keyword::As) {
            Some(self.binding_name()?.0)
        } else {
            None
        };
        self.end_line()?;
        Ok(Decl::Use(UseDecl {
            module,
            alias,
            include,
            span,
        }))
    }

    fn parse_alias(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("alias")?;
        self.expect_keyword(Keyword::Is)?;
        let target = self.parse_type_ref()?;
        self.end_line()?;
        Ok(Decl::Alias(AliasDecl { name, target, span }))
    }

    pub(crate) fn parse_type_ref(&mut self) -> ParseResult<TypeRef> {
        let span = self.span();
        let token = self.peek().clone();
        let name = match (&token.kind, &token.value) {
            (TokenKind::String, TokenValue::Text(s)) => s.clone(),
            (TokenKind::Ident, TokenValue::Ident(s)) => s.clone(),
            (TokenKind::Keyword(k), _) if k.is_type() => k.as_str().to_string(),
            _ => return Err(self.unexpected("Expected a type")),
        };
        self.advance();
        Ok(TypeRef { name, span })
    }

    /* ===================== record ===================== */

    fn parse_record(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("record")?;
        self.open_block("record name")?;

        let mut fields: Vec<FieldDecl> = Vec::new();
        let mut order_by = None;
        while !self.close_block() {
            if self.check_keyword(Keyword::Order) && self.peek_at(1).is_keyword(Keyword::By) {
                self.advance();
                self.advance();
                let (field, field_span) = self.word("field name after 'order by'")?;
                order_by = Some(Named {
                    name: field,
                    span: field_span,
                });
                self.end_line()?;
                continue;
            }

            let (field_name, field_span) = self.field_name("field name")?;
            if fields.iter().any(|f| f.name == field_name) {
                return Err(ParseError::duplicate(
                    format!("Duplicate field '{}'", field_name),
                    &field_name,
                    field_span.line,
                    field_span.column,
                ));
            }
            self.eat_keyword(Keyword::Is);
            let type_ref = self.parse_type_ref()?;
            let mut constraints = Vec::new();
            while self.eat_keyword(Keyword::Must) {
                constraints.push(self.parse_constraint()?);
                self.eat_keyword(Keyword::And);
            }
            self.end_line()?;
            fields.push(FieldDecl {
                name: field_name,
                type_ref,
                constraints,
                span: field_span,
            });
        }

        Ok(Decl::Record(RecordDecl {
            name,
            fields,
            order_by,
            span,
        }))
    }

    /// Constraint after `must`.
    fn parse_constraint(&mut self) -> ParseResult<FieldConstraint> {
        if self.eat_keyword(Keyword::Match) {
            self.expect_keyword(Keyword::Pattern)?;
            let pattern = self.expect_string("pattern")?;
            return Ok(FieldConstraint::Pattern(pattern));
        }
        if self.eat_keyword(Keyword::Have) {
            self.expect_keyword(Keyword::Length)?;
            self.expect_keyword(Keyword::At)?;
            let at_least = if self.eat_keyword(Keyword::Least) {
                true
            } else {
                self.expect_keyword(Keyword::Most)?;
                false
            };
            let n = self.constraint_number()?;
            let length = n
                .to_i64()
                .filter(|v| *v >= 0 && n.is_integer())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    ParseError::syntax("Length must be a whole number", self.peek())
                })?;
            return Ok(if at_least {
                FieldConstraint::MinLength(length)
            } else {
                FieldConstraint::MaxLength(length)
            });
        }

        self.expect_keyword(Keyword::Be)?;
        if self.eat_keyword(Keyword::Present) {
            return Ok(FieldConstraint::Present);
        }
        if self.eat_keyword(Keyword::Unique) {
            return Ok(FieldConstraint::Unique);
        }
        if self.eat_keyword(Keyword::Greater) {
            self.expect_keyword(Keyword::Than)?;
            return Ok(FieldConstraint::GreaterThan(self.constraint_number()?));
        }
        if self.eat_keyword(Keyword::Less) {
            self.expect_keyword(Keyword::Than)?;
            return Ok(FieldConstraint::LessThan(self.constraint_number()?));
        }
        if self.eat_keyword(Keyword::At) {
            if self.eat_keyword(Keyword::Least) {
                return Ok(FieldConstraint::AtLeast(self.constraint_number()?));
            }
            self.expect_keyword(Keyword::Most)?;
            return Ok(FieldConstraint::AtMost(self.constraint_number()?));
        }
        Err(self.unexpected("Unknown field constraint"))
    }

    fn constraint_number(&mut self) -> ParseResult<Decimal> {
        let negative = self.eat(TokenKind::Minus);
        let token = self.peek().clone();
        match (&token.kind, &token.value) {
            (TokenKind::Number, TokenValue::Number(n)) => {
                self.advance();
                Ok(if negative { n.neg() } else { *n })
            }
            _ => Err(self.unexpected("Expected a number")),
        }
    }

    /* ===================== flow / pipeline ===================== */

    fn parse_flow(&mut self) -> ParseResult<Decl> {
        let kind = if self.check_keyword(Keyword::Pipeline) {
            FlowKind::Pipeline
        } else {
            FlowKind::Flow
        };
        let (name, span) = self.decl_header(kind.as_str())?;
        self.open_block(&format!("{} name", kind.as_str()))?;

        let mut purity = None;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut body = Vec::new();

        while !self.close_block() {
            if body.is_empty() {
                if self.check_keyword(Keyword::Purity) {
                    self.advance();
                    purity = Some(self.parse_purity()?);
                    continue;
                }
                if self.check_keyword(Keyword::Input) && self.peek_at(1).kind == TokenKind::Colon
                {
                    self.advance();
                    inputs = self.parse_param_block("input")?;
                    continue;
                }
                if self.check_keyword(Keyword::Output) && self.peek_at(1).kind == TokenKind::Colon
                {
                    self.advance();
                    outputs = self.parse_param_block("output")?;
                    continue;
                }
            }
            self.parse_statement(&mut body)?;
        }

        Ok(Decl::Flow(FlowDecl {
            name,
            kind,
            purity,
            inputs,
            outputs,
            body,
            span,
        }))
    }

    fn parse_purity(&mut self) -> ParseResult<Purity> {
        self.expect_keyword(Keyword::Is)?;
        let token = self.peek().clone();
        let text = self.expect_string("purity")?;
        let purity = match text.as_str() {
            "pure" => Purity::Pure,
            "effectful" | "impure" => Purity::Effectful,
            other => {
                return Err(ParseError::syntax(
                    format!("Purity must be \"pure\" or \"effectful\", not \"{}\"", other),
                    &token,
                ))
            }
        };
        self.end_line()?;
        Ok(purity)
    }

    /// `input:` / `output:` / `request:` / `response:` block of
    /// `name is type` lines. The section keyword has been consumed.
    fn parse_param_block(&mut self, section: &str) -> ParseResult<Vec<ParamDecl>> {
        self.open_block(section)?;
        let mut params: Vec<ParamDecl> = Vec::new();
        while !self.close_block() {
            let (name, span) = self.field_name(&format!("{} name", section))?;
            if params.iter().any(|p| p.name == name) {
                return Err(ParseError::duplicate(
                    format!("Duplicate {} '{}'", section, name),
                    &name,
                    span.line,
                    span.column,
                ));
            }
            self.expect_keyword(Keyword::Is)?;
            let type_ref = self.parse_type_ref()?;
            self.end_line()?;
            params.push(ParamDecl {
                name,
                type_ref,
                span,
            });
        }
        Ok(params)
    }

    /* ===================== tool / ai / agent / team ===================== */

    fn parse_tool(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("tool")?;
        self.open_block("tool name")?;

        let mut tool = ToolDecl {
            name,
            kind: None,
            purity: None,
            capabilities: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            span,
        };
        while !self.close_block() {
            let (key, key_span) = self.word("tool property")?;
            match key.as_str() {
                "kind" => tool.kind = Some(self.string_property("kind")?),
                "purity" => tool.purity = Some(self.parse_purity()?),
                "capability" => {
                    let cap = self.named_property("capability")?;
                    tool.capabilities.push(cap);
                }
                "input" => tool.inputs = self.parse_param_block("input")?,
                "output" => tool.outputs = self.parse_param_block("output")?,
                _ => return Err(self.unknown_property("tool", &key, key_span)),
            }
        }
        Ok(Decl::Tool(tool))
    }

    fn parse_ai(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("ai")?;
        self.open_block("ai name")?;

        let mut ai = AiDecl {
            name,
            model: None,
            provider: None,
            system_prompt: None,
            prompt: None,
            tools: Vec::new(),
            span,
        };
        while !self.close_block() {
            let (key, key_span) = self.word("ai property")?;
            match key.as_str() {
                "model" => ai.model = Some(self.string_property("model")?),
                "provider" => ai.provider = Some(self.string_property("provider")?),
                "system_prompt" => ai.system_prompt = Some(self.string_property("system prompt")?),
                "prompt" => ai.prompt = Some(self.named_property("prompt")?),
                "tools" => {
                    self.open_block("tools")?;
                    while !self.close_block() {
                        self.expect_keyword(Keyword::Expose)?;
                        let tool = self.expect_named("tool name")?;
                        self.end_line()?;
                        ai.tools.push(tool);
                    }
                }
                _ => return Err(self.unknown_property("ai", &key, key_span)),
            }
        }
        Ok(Decl::Ai(ai))
    }

    fn parse_agent(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("agent")?;
        self.open_block("agent name")?;

        let mut ai = None;
        let mut system_prompt = None;
        while !self.close_block() {
            let (key, key_span) = self.word("agent property")?;
            match key.as_str() {
                "ai" => ai = Some(self.named_property("ai")?),
                "system_prompt" => system_prompt = Some(self.string_property("system prompt")?),
                _ => return Err(self.unknown_property("agent", &key, key_span)),
            }
        }
        let ai = ai.ok_or_else(|| ParseError::Syntax {
            message: format!("Agent '{}' must name its ai", name),
            line: span.line,
            column: span.column,
        })?;
        Ok(Decl::Agent(AgentDecl {
            name,
            ai,
            system_prompt,
            span,
        }))
    }

    fn parse_team(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("team")?;
        self.open_block("team name")?;

        let mut agents = Vec::new();
        while !self.close_block() {
            let (key, key_span) = self.word("team property")?;
            match key.as_str() {
                "agent" => agents.push(self.named_property("agent")?),
                _ => return Err(self.unknown_property("team", &key, key_span)),
            }
        }
        Ok(Decl::Team(TeamDecl { name, agents, span }))
    }

    /* ===================== policy / job / prompt ===================== */

    fn parse_policy(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("policy")?;
        self.open_block("policy name")?;

        let mut flows = Vec::new();
        let mut grants = Vec::new();
        while !self.close_block() {
            let (key, key_span) = self.word("policy property")?;
            match key.as_str() {
                "flow" => flows.push(self.named_property("flow")?),
                "grant" => {
                    grants.push(self.expect_named("capability")?);
                    self.end_line()?;
                }
                _ => return Err(self.unknown_property("policy", &key, key_span)),
            }
        }
        Ok(Decl::Policy(PolicyDecl {
            name,
            flows,
            grants,
            span,
        }))
    }

    fn parse_job(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("job")?;
        self.open_block("job name")?;

        let mut flow = None;
        let mut schedule = None;
        while !self.close_block() {
            let (key, key_span) = self.word("job property")?;
            match key.as_str() {
                "flow" => flow = Some(self.named_property("flow")?),
                "schedule" => schedule = Some(self.string_property("schedule")?),
                _ => return Err(self.unknown_property("job", &key, key_span)),
            }
        }
        let flow = flow.ok_or_else(|| ParseError::Syntax {
            message: format!("Job '{}' must name the flow it runs", name),
            line: span.line,
            column: span.column,
        })?;
        Ok(Decl::Job(JobDecl {
            name,
            flow,
            schedule,
            span,
        }))
    }

    fn parse_prompt(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("prompt")?;
        self.open_block("prompt name")?;

        let mut version = None;
        let mut text = None;
        while !self.close_block() {
            let (key, key_span) = self.word("prompt property")?;
            match key.as_str() {
                "version" => version = Some(self.string_property("version")?),
                "text" => text = Some(self.string_property("prompt text")?),
                _ => return Err(self.unknown_property("prompt", &key, key_span)),
            }
        }
        let text = text.ok_or_else(|| ParseError::Syntax {
            message: format!("Prompt '{}' must have text", name),
            line: span.line,
            column: span.column,
        })?;
        Ok(Decl::Prompt(PromptDecl {
            name,
            version,
            text,
            span,
        }))
    }

    /* ===================== page / route ===================== */

    fn parse_page(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("page")?;
        self.open_block("page name")?;

        let mut items = Vec::new();
        while !self.close_block() {
            let (key, key_span) = self.word("page item")?;
            let item = match key.as_str() {
                "title" => PageItem::Title {
                    value: self.string_property("title")?,
                    span: key_span,
                },
                "text" => PageItem::Text {
                    value: self.string_property("text")?,
                    span: key_span,
                },
                "form" => PageItem::Form {
                    record: self.named_property("record name")?,
                    span: key_span,
                },
                "table" => PageItem::Table {
                    record: self.named_property("record name")?,
                    span: key_span,
                },
                "button" => {
                    let label = self.expect_string("button label")?;
                    self.open_block("button label")?;
                    self.expect_keyword(Keyword::Calls)?;
                    self.expect_keyword(Keyword::Flow)?;
                    let flow = self.expect_named("flow name")?;
                    self.end_line()?;
                    if !self.close_block() {
                        return Err(self.unexpected("Expected end of button block"));
                    }
                    PageItem::Button {
                        label,
                        flow,
                        span: key_span,
                    }
                }
                _ => return Err(self.unknown_property("page", &key, key_span)),
            };
            items.push(item);
        }
        Ok(Decl::Page(PageDecl { name, items, span }))
    }

    fn parse_route(&mut self) -> ParseResult<Decl> {
        let (name, span) = self.decl_header("route")?;
        self.open_block("route name")?;

        let mut path = None;
        let mut method = None;
        let mut request = Vec::new();
        let mut response = Vec::new();
        let mut flow = None;
        let mut seen = HashSet::new();
        while !self.close_block() {
            let (key, key_span) = self.word("route property")?;
            if !seen.insert(key.clone()) {
                return Err(ParseError::duplicate(
                    format!("Duplicate route property '{}'", key),
                    &key,
                    key_span.line,
                    key_span.column,
                ));
            }
            match key.as_str() {
                "path" => path = Some(self.string_property("path")?),
                "method" => method = Some(self.string_property("method")?.to_uppercase()),
                "request" => request = self.parse_param_block("request")?,
                "response" => response = self.parse_param_block("response")?,
                "flow" => flow = Some(self.named_property("flow")?),
                _ => return Err(self.unknown_property("route", &key, key_span)),
            }
        }

        let missing = |what: &str| ParseError::Syntax {
            message: format!("Route '{}' is missing {}", name, what),
            line: span.line,
            column: span.column,
        };
        let path = path.ok_or_else(|| missing("path"))?;
        let flow = flow.ok_or_else(|| missing("flow"))?;
        if response.is_empty() {
            return Err(missing("response"));
        }
        Ok(Decl::Route(RouteDecl {
            path,
            method: method.unwrap_or_else(|| "GET".to_string()),
            request,
            response,
            flow,
            name,
            span,
        }))
    }
}
