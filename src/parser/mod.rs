//! # Parser
//!
//! Recursive descent over the token stream produced by [`crate::lexer`].
//! One parse function per declaration, statement and expression category;
//! the first error halts parsing.
//!
//! ## Layout
//!
//! Every block header ends with `:` followed by `Newline Indent`, and the
//! block ends at the matching `Dedent`. A block construct consumes its own
//! `Dedent`; single-line statements consume their `Newline`.

pub mod ast;
pub mod declarations;
pub mod error;
pub mod expressions;
pub mod grammar;
pub mod printer;
pub mod statements;

#[cfg(test)]
mod tests;

pub use ast::Program;
pub use error::{ParseError, ParseResult};
pub use grammar::{GrammarSnapshot, ParserBackend, ReferenceParser};
pub use printer::print_program;

use crate::lexer::{tokenize, Keyword, Token, TokenKind, TokenValue};
use ast::{Named, Span};

/* ===================== Options ===================== */

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Reject programs without a leading `spec is "…"` line
    pub require_spec: bool,
    /// Maximum nesting of blocks and parenthesized expressions
    pub max_depth: usize,
    /// Source index stamped on every span
    pub source: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            require_spec: false,
            max_depth: 64,
            source: 0,
        }
    }
}

/* ===================== Public API ===================== */

/// Parse a token sequence into a program.
pub fn parse(tokens: &[Token], options: &ParseOptions) -> ParseResult<Program> {
    Parser::new(tokens, options).parse_program()
}

/// Tokenize and parse source text with default options.
pub fn parse_source(source: &str) -> ParseResult<Program> {
    let tokens = tokenize(source)?;
    parse(&tokens, &ParseOptions::default())
}

/* ===================== Parser ===================== */

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    options: &'a ParseOptions,
    depth: usize,
    eof: Token,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], options: &'a ParseOptions) -> Self {
        let (line, column) = tokens.last().map(|t| (t.line, t.column)).unwrap_or((1, 1));
        Self {
            tokens,
            pos: 0,
            options,
            depth: 0,
            eof: Token::layout(TokenKind::Eof, line, column),
        }
    }

    pub fn parse_program(&mut self) -> ParseResult<Program> {
        self.skip_newlines();

        let spec_version = if self.check_keyword(Keyword::Spec) {
            self.advance();
            self.expect_keyword(Keyword::Is)?;
            let version = self.expect_string("spec version")?;
            self.end_line()?;
            Some(version)
        } else if self.options.require_spec {
            return Err(ParseError::syntax(
                "Program must start with 'spec is \"<version>\"'",
                self.peek(),
            ));
        } else {
            None
        };

        let mut declarations = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::Eof) {
                break;
            }
            declarations.push(self.parse_declaration()?);
        }

        Ok(Program {
            spec_version,
            declarations,
        })
    }

    /* ---------- token cursor ---------- */

    pub(crate) fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&self.eof)
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_keyword(keyword)
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.column).in_source(self.options.source)
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /* ---------- expectations ---------- */

    pub(crate) fn expect(&mut self, kind: TokenKind, context: &str) -> ParseResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.unexpected(&format!("Expected {} {}", kind.describe(), context)))
    }

    pub(crate) fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        if self.check_keyword(keyword) {
            return Ok(self.advance());
        }
        Err(self.unexpected(&format!("Expected '{}'", keyword.as_str())))
    }

    pub(crate) fn expect_string(&mut self, what: &str) -> ParseResult<String> {
        let token = self.peek();
        match (&token.kind, &token.value) {
            (TokenKind::String, TokenValue::Text(s)) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected(&format!("Expected a quoted {}", what))),
        }
    }

    /// Quoted reference to another declaration.
    pub(crate) fn expect_named(&mut self, what: &str) -> ParseResult<Named> {
        let span = self.span();
        let name = self.expect_string(what)?;
        Ok(Named { name, span })
    }

    pub(crate) fn end_line(&mut self) -> ParseResult<()> {
        if self.eat(TokenKind::Newline) || self.check(TokenKind::Eof) {
            return Ok(());
        }
        Err(self.unexpected("Expected end of line"))
    }

    /// `: Newline Indent` opening a block.
    pub(crate) fn open_block(&mut self, header: &str) -> ParseResult<()> {
        if !self.check(TokenKind::Colon) {
            return Err(self.unexpected(&format!("Expected ':' after {}", header)));
        }
        self.advance();
        self.expect(TokenKind::Newline, &format!("after '{}:'", header))?;
        if !self.check(TokenKind::Indent) {
            return Err(ParseError::syntax(
                format!("Expected an indented block after '{}:'", header),
                self.peek(),
            ));
        }
        self.advance();
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(ParseError::syntax("Blocks are nested too deeply", self.peek()));
        }
        Ok(())
    }

    /// True (and consumes the `Dedent`) when the current block has ended.
    pub(crate) fn close_block(&mut self) -> bool {
        if self.check(TokenKind::Dedent) {
            self.advance();
            self.depth = self.depth.saturating_sub(1);
            return true;
        }
        if self.check(TokenKind::Eof) {
            self.depth = self.depth.saturating_sub(1);
            return true;
        }
        false
    }

    pub(crate) fn enter_nesting(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(ParseError::syntax(
                "Expression is nested too deeply",
                self.peek(),
            ));
        }
        Ok(())
    }

    pub(crate) fn leave_nesting(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /* ---------- names ---------- */

    /// A name being bound (`let`, `for each`, `as`). Reserved words are
    /// rejected unless written with backticks.
    pub(crate) fn binding_name(&mut self) -> ParseResult<(String, Span)> {
        let span = self.span();
        let token = self.peek().clone();
        match (&token.kind, &token.value) {
            (TokenKind::Ident, TokenValue::Ident(name)) => {
                self.advance();
                Ok((name.clone(), span))
            }
            (TokenKind::Keyword(keyword), _) => Err(ParseError::reserved(keyword.as_str(), &token)),
            (TokenKind::Boolean, TokenValue::Bool(b)) => {
                Err(ParseError::reserved(if *b { "true" } else { "false" }, &token))
            }
            (TokenKind::Null, _) => Err(ParseError::reserved("null", &token)),
            _ => Err(self.unexpected("Expected a name")),
        }
    }

    /// Any identifier or keyword spelling; used for field names, property
    /// keys and tool phrases where reserved words are allowed.
    pub(crate) fn word(&mut self, what: &str) -> ParseResult<(String, Span)> {
        let span = self.span();
        match self.peek_word() {
            Some(word) => {
                let word = word.to_string();
                self.advance();
                Ok((word, span))
            }
            None => Err(self.unexpected(&format!("Expected {}", what))),
        }
    }

    pub(crate) fn peek_word(&self) -> Option<&str> {
        let token = self.peek();
        match token.kind {
            TokenKind::Ident | TokenKind::Keyword(_) => token.text(),
            _ => None,
        }
    }

    pub(crate) fn is_word_at(&self, offset: usize) -> bool {
        matches!(
            self.peek_at(offset).kind,
            TokenKind::Ident | TokenKind::Keyword(_)
        )
    }

    /// Field name: a word or a quoted string.
    pub(crate) fn field_name(&mut self, what: &str) -> ParseResult<(String, Span)> {
        if self.check(TokenKind::String) {
            let span = self.span();
            let name = self.expect_string(what)?;
            return Ok((name, span));
        }
        self.word(what)
    }

    pub(crate) fn unexpected(&self, message: &str) -> ParseError {
        let token = self.peek();
        let found = match (&token.kind, token.text()) {
            (TokenKind::Ident, Some(text)) => format!("'{}'", text),
            (TokenKind::String, Some(text)) => format!("\"{}\"", text),
            (kind, _) => kind.describe(),
        };
        ParseError::syntax(format!("{}, found {}", message, found), token)
    }
}
