//! # Lexer
//!
//! Turns source text into a flat token sequence.
//!
//! ## Layout rules
//!
//! - Leading spaces of every non-blank, non-comment line are compared against
//!   an indentation stack. Deeper lines push and emit `Indent`; shallower
//!   lines pop and emit one `Dedent` per popped level. A width that matches
//!   no stack entry is a [`LexErrorKind::BadIndent`].
//! - Every logical line ends with `Newline`. At end of input the stack is
//!   unwound with `Dedent`s and a single `Eof` is emitted.
//! - `#` starts a comment that runs to the end of the line.
//! - Triple-quoted strings may span lines; the lines they cover produce no
//!   layout tokens.

pub mod keywords;
pub mod scan;
pub mod token;


pub use keywords::{Keyword, KeywordTable};
pub use scan::{tokenize_with, FastScanner};
pub use token::{Token, TokenKind, TokenValue};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::Diagnostic;
use crate::value::Decimal;

/* ===================== Errors ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LexErrorKind {
    BadIndent,
    TabIndent,
    UnterminatedString,
    InvalidEscape,
    InvalidNumber,
    UnexpectedCharacter,
    UnterminatedIdentifier,
}

impl LexErrorKind {
    pub fn error_id(&self) -> &'static str {
        match self {
            LexErrorKind::BadIndent => "lex.bad_indent",
            LexErrorKind::TabIndent => "lex.tab_indent",
            LexErrorKind::UnterminatedString => "lex.unterminated_string",
            LexErrorKind::InvalidEscape => "lex.invalid_escape",
            LexErrorKind::InvalidNumber => "lex.invalid_number",
            LexErrorKind::UnexpectedCharacter => "lex.unexpected_character",
            LexErrorKind::UnterminatedIdentifier => "lex.unterminated_identifier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl LexError {
    fn new(kind: LexErrorKind, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            column,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::new(self.kind.error_id(), self.message.clone()).at(self.line, self.column)
    }
}

/* ===================== Lexer ===================== */

/// Reference lexer over one source text.
pub struct Lexer<'a> {
    lines: Vec<Vec<char>>,
    keywords: &'a KeywordTable,
    tokens: Vec<Token>,
    indent_stack: Vec<usize>,
}

/// Tokenize with the standard keyword table.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source, KeywordTable::standard()).tokenize()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, keywords: &'a KeywordTable) -> Self {
        let lines = source
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).chars().collect())
            .collect();
        Self {
            lines,
            keywords,
            tokens: Vec::new(),
            indent_stack: vec![0],
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut idx = 0;
        while idx < self.lines.len() {
            let line_no = (idx + 1) as u32;
            let line = self.lines[idx].clone();

            let mut indent = 0;
            while indent < line.len() && line[indent] == ' ' {
                indent += 1;
            }
            if indent < line.len() && line[indent] == '\t' {
                return Err(LexError::new(
                    LexErrorKind::TabIndent,
                    "Tabs are not allowed in indentation; use spaces",
                    line_no,
                    (indent + 1) as u32,
                ));
            }
            if indent == line.len() || line[indent] == '#' {
                idx += 1;
                continue;
            }

            self.apply_indent(indent, line_no)?;
            idx = self.scan_line(idx, indent)?;
            let (last_line, last_len) = self.position_after(idx);
            self.tokens
                .push(Token::layout(TokenKind::Newline, last_line, last_len));
            idx += 1;
        }

        let eof_line = (self.lines.len().max(1)) as u32;
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.tokens.push(Token::layout(TokenKind::Dedent, eof_line, 1));
        }
        self.tokens.push(Token::layout(TokenKind::Eof, eof_line, 1));
        Ok(self.tokens)
    }

    fn position_after(&self, idx: usize) -> (u32, u32) {
        let len = self.lines.get(idx).map(|l| l.len()).unwrap_or(0);
        ((idx + 1) as u32, (len + 1) as u32)
    }

    fn apply_indent(&mut self, indent: usize, line_no: u32) -> Result<(), LexError> {
        let top = *self.indent_stack.last().unwrap_or(&0);
        if indent > top {
            self.indent_stack.push(indent);
            self.tokens.push(Token::layout(TokenKind::Indent, line_no, 1));
            return Ok(());
        }
        while indent < *self.indent_stack.last().unwrap_or(&0) {
            self.indent_stack.pop();
            self.tokens.push(Token::layout(TokenKind::Dedent, line_no, 1));
        }
        if indent != *self.indent_stack.last().unwrap_or(&0) {
            return Err(LexError::new(
                LexErrorKind::BadIndent,
                format!(
                    "Indentation of {} spaces does not match any enclosing block",
                    indent
                ),
                line_no,
                (indent + 1) as u32,
            ));
        }
        Ok(())
    }

    /// Scan tokens of line `idx` starting at column `start`. Returns the index
    /// of the last physical line consumed (greater than `idx` when a
    /// triple-quoted string spans lines).
    fn scan_line(&mut self, mut idx: usize, start: usize) -> Result<usize, LexError> {
        let mut line = self.lines[idx].clone();
        let mut pos = start;

        while pos < line.len() {
            let ch = line[pos];
            let line_no = (idx + 1) as u32;
            let column = (pos + 1) as u32;

            if ch == ' ' || ch == '\t' {
                pos += 1;
                continue;
            }
            if ch == '#' {
                break;
            }

            if ch == '"' {
                if line[pos..].starts_with(&['"', '"', '"']) {
                    let (text, end_idx, end_pos) = self.scan_triple_string(idx, pos + 3)?;
                    self.tokens.push(Token::new(
                        TokenKind::String,
                        TokenValue::Text(text),
                        line_no,
                        column,
                    ));
                    idx = end_idx;
                    line = self.lines[idx].clone();
                    pos = end_pos;
                    continue;
                }
                let (text, end) = scan_string(&line, pos + 1, line_no)?;
                self.tokens.push(Token::new(
                    TokenKind::String,
                    TokenValue::Text(text),
                    line_no,
                    column,
                ));
                pos = end;
                continue;
            }

            if ch.is_ascii_digit() {
                let mut end = pos;
                while end < line.len() && line[end].is_ascii_digit() {
                    end += 1;
                }
                if end + 1 < line.len() && line[end] == '.' && line[end + 1].is_ascii_digit() {
                    end += 1;
                    while end < line.len() && line[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let text: String = line[pos..end].iter().collect();
                let number = Decimal::parse(&text).ok_or_else(|| {
                    LexError::new(
                        LexErrorKind::InvalidNumber,
                        format!("Number '{}' is out of range", text),
                        line_no,
                        column,
                    )
                })?;
                self.tokens.push(Token::new(
                    TokenKind::Number,
                    TokenValue::Number(number),
                    line_no,
                    column,
                ));
                pos = end;
                continue;
            }

            if ch == '`' {
                let mut end = pos + 1;
                while end < line.len() && line[end] != '`' {
                    end += 1;
                }
                if end >= line.len() || end == pos + 1 {
                    return Err(LexError::new(
                        LexErrorKind::UnterminatedIdentifier,
                        "Escaped identifier must be closed with a backtick",
                        line_no,
                        column,
                    ));
                }
                let name: String = line[pos + 1..end].iter().collect();
                let mut token =
                    Token::new(TokenKind::Ident, TokenValue::Ident(name), line_no, column);
                token.escaped = true;
                self.tokens.push(token);
                pos = end + 1;
                continue;
            }

            if ch.is_alphabetic() || ch == '_' {
                let mut end = pos;
                while end < line.len() && (line[end].is_alphanumeric() || line[end] == '_') {
                    end += 1;
                }
                let word: String = line[pos..end].iter().collect();
                self.tokens.push(self.word_token(word, line_no, column));
                pos = end;
                continue;
            }

            let next = line.get(pos + 1).copied();
            let (kind, width) = match (ch, next) {
                ('*', Some('*')) => (TokenKind::Power, 2),
                ('=', Some('=')) => (TokenKind::EqEq, 2),
                ('!', Some('=')) => (TokenKind::NotEq, 2),
                ('<', Some('=')) => (TokenKind::Lte, 2),
                ('>', Some('=')) => (TokenKind::Gte, 2),
                (':', _) => (TokenKind::Colon, 1),
                ('.', _) => (TokenKind::Dot, 1),
                (',', _) => (TokenKind::Comma, 1),
                ('+', _) => (TokenKind::Plus, 1),
                ('-', _) => (TokenKind::Minus, 1),
                ('*', _) => (TokenKind::Star, 1),
                ('/', _) => (TokenKind::Slash, 1),
                ('%', _) => (TokenKind::Percent, 1),
                ('=', _) => (TokenKind::Equals, 1),
                ('<', _) => (TokenKind::Lt, 1),
                ('>', _) => (TokenKind::Gt, 1),
                ('(', _) => (TokenKind::LParen, 1),
                (')', _) => (TokenKind::RParen, 1),
                ('[', _) => (TokenKind::LBracket, 1),
                (']', _) => (TokenKind::RBracket, 1),
                ('{', _) => (TokenKind::LBrace, 1),
                ('}', _) => (TokenKind::RBrace, 1),
                ('|', _) => (TokenKind::Pipe, 1),
                ('!', _) => (TokenKind::Bang, 1),
                _ => {
                    return Err(LexError::new(
                        LexErrorKind::UnexpectedCharacter,
                        format!("Unexpected character '{}'", ch),
                        line_no,
                        column,
                    ))
                }
            };
            let text = kind.punct_text().unwrap_or_default().to_string();
            self.tokens
                .push(Token::new(kind, TokenValue::Punct(text), line_no, column));
            pos += width;
        }
        Ok(idx)
    }

    fn word_token(&self, word: String, line: u32, column: u32) -> Token {
        match word.as_str() {
            "true" => Token::new(TokenKind::Boolean, TokenValue::Bool(true), line, column),
            "false" => Token::new(TokenKind::Boolean, TokenValue::Bool(false), line, column),
            "null" => Token::new(TokenKind::Null, TokenValue::None, line, column),
            _ => match self.keywords.lookup(&word) {
                Some(keyword) => Token::new(
                    TokenKind::Keyword(keyword),
                    TokenValue::Keyword(keyword),
                    line,
                    column,
                ),
                None => Token::new(TokenKind::Ident, TokenValue::Ident(word), line, column),
            },
        }
    }

    /// Scan the body of a `"""` string opened on line `idx` before `pos`.
    fn scan_triple_string(
        &self,
        start_idx: usize,
        start_pos: usize,
    ) -> Result<(String, usize, usize), LexError> {
        let mut text = String::new();
        let mut idx = start_idx;
        let mut pos = start_pos;
        loop {
            let line = &self.lines[idx];
            while pos < line.len() {
                if line[pos..].starts_with(&['"', '"', '"']) {
                    return Ok((text, idx, pos + 3));
                }
                if line[pos] == '\\' {
                    let escaped = unescape(line.get(pos + 1).copied()).ok_or_else(|| {
                        LexError::new(
                            LexErrorKind::InvalidEscape,
                            "Unsupported escape sequence",
                            (idx + 1) as u32,
                            (pos + 1) as u32,
                        )
                    })?;
                    text.push(escaped);
                    pos += 2;
                    continue;
                }
                text.push(line[pos]);
                pos += 1;
            }
            idx += 1;
            if idx >= self.lines.len() {
                return Err(LexError::new(
                    LexErrorKind::UnterminatedString,
                    "Triple-quoted string is never closed",
                    (start_idx + 1) as u32,
                    (start_pos - 2) as u32,
                ));
            }
            text.push('\n');
            pos = 0;
        }
    }
}

fn unescape(ch: Option<char>) -> Option<char> {
    match ch? {
        'n' => Some('\n'),
        't' => Some('\t'),
        '"' => Some('"'),
        '\\' => Some('\\'),
        _ => None,
    }
}

/// Scan a single-line string whose opening quote precedes `start`.
fn scan_string(line: &[char], start: usize, line_no: u32) -> Result<(String, usize), LexError> {
    let mut text = String::new();
    let mut pos = start;
    while pos < line.len() {
        match line[pos] {
            '"' => return Ok((text, pos + 1)),
            '\\' => {
                let escaped = unescape(line.get(pos + 1).copied()).ok_or_else(|| {
                    LexError::new(
                        LexErrorKind::InvalidEscape,
                        "Unsupported escape sequence; use \\n, \\t, \\\" or \\\\",
                        line_no,
                        (pos + 1) as u32,
                    )
                })?;
                text.push(escaped);
                pos += 2;
            }
            ch => {
                text.push(ch);
                pos += 1;
            }
        }
    }
    Err(LexError::new(
        LexErrorKind::UnterminatedString,
        "String is never closed",
        line_no,
        start as u32,
    ))
}
