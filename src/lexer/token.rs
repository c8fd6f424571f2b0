//! Token types

use serde::{Deserialize, Serialize};

use super::keywords::Keyword;
use crate::value::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    String,
    Number,
    Boolean,
    Null,

    Colon,
    Dot,
    Comma,
    Plus,
    Minus,
    Star,
    Power,
    Slash,
    Percent,
    Equals,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Pipe,
    Bang,

    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    /// Short human name used in parse diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident => "identifier".to_string(),
            TokenKind::Keyword(k) => format!("'{}'", k.as_str()),
            TokenKind::String => "text".to_string(),
            TokenKind::Number => "number".to_string(),
            TokenKind::Boolean => "boolean".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indented block".to_string(),
            TokenKind::Dedent => "end of block".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("'{}'", other.punct_text().unwrap_or("?")),
        }
    }

    pub fn punct_text(&self) -> Option<&'static str> {
        let text = match self {
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Power => "**",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Equals => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Lte => "<=",
            TokenKind::Gte => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Pipe => "|",
            TokenKind::Bang => "!",
            _ => return None,
        };
        Some(text)
    }
}

/// Payload carried by a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum TokenValue {
    None,
    Ident(String),
    Text(String),
    Number(Decimal),
    Bool(bool),
    Keyword(Keyword),
    Punct(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    /// 1-based
    pub line: u32,
    /// 1-based, counted in characters
    pub column: u32,
    /// Set for backtick identifiers; such a token is never treated as reserved
    #[serde(default)]
    pub escaped: bool,
}

impl Token {
    pub fn new(kind: TokenKind, value: TokenValue, line: u32, column: u32) -> Self {
        Self {
            kind,
            value,
            line,
            column,
            escaped: false,
        }
    }

    pub fn layout(kind: TokenKind, line: u32, column: u32) -> Self {
        Self::new(kind, TokenValue::None, line, column)
    }

    /// Identifier text, keyword spelling or string contents.
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Ident(s) | TokenValue::Text(s) | TokenValue::Punct(s) => Some(s),
            TokenValue::Keyword(k) => Some(k.as_str()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }
}
