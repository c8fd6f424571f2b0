use thiserror::Error;

use crate::errors::Diagnostic;
use crate::lexer::{LexError, Token};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{message} (line {line}, column {column})")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },

    /// A reserved word used where a binding name is expected
    #[error("'{keyword}' is a reserved word (line {line}, column {column})")]
    ReservedIdentifier {
        keyword: String,
        suggestion: String,
        line: u32,
        column: u32,
    },

    /// The same name declared twice inside one construct
    #[error("{message} (line {line}, column {column})")]
    Duplicate {
        message: String,
        name: String,
        line: u32,
        column: u32,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub fn syntax(message: impl Into<String>, token: &Token) -> Self {
        ParseError::Syntax {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    pub fn reserved(keyword: &str, token: &Token) -> Self {
        ParseError::ReservedIdentifier {
            keyword: keyword.to_string(),
            suggestion: format!("my_{}", keyword),
            line: token.line,
            column: token.column,
        }
    }

    pub fn duplicate(message: impl Into<String>, name: &str, line: u32, column: u32) -> Self {
        ParseError::Duplicate {
            message: message.into(),
            name: name.to_string(),
            line,
            column,
        }
    }

    pub fn error_id(&self) -> &'static str {
        match self {
            ParseError::Lex(e) => e.kind.error_id(),
            ParseError::Syntax { .. } => "parse.syntax",
            ParseError::ReservedIdentifier { .. } => "parse.reserved_identifier",
            ParseError::Duplicate { .. } => "parse.duplicate",
        }
    }

    pub fn position(&self) -> (u32, u32) {
        match self {
            ParseError::Lex(e) => (e.line, e.column),
            ParseError::Syntax { line, column, .. }
            | ParseError::ReservedIdentifier { line, column, .. }
            | ParseError::Duplicate { line, column, .. } => (*line, *column),
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            ParseError::Lex(e) => e.diagnostic(),
            ParseError::Syntax {
                message,
                line,
                column,
            } => Diagnostic::new(self.error_id(), message.clone()).at(*line, *column),
            ParseError::ReservedIdentifier {
                keyword,
                suggestion,
                line,
                column,
            } => Diagnostic::new(
                self.error_id(),
                format!(
                    "'{}' is a reserved word and cannot be used as a name. Try '{}' or write `{}`",
                    keyword, suggestion, keyword
                ),
            )
            .at(*line, *column)
            .detail("error_id", self.error_id())
            .detail("keyword", keyword.as_str())
            .detail("suggestion", suggestion.as_str()),
            ParseError::Duplicate {
                message,
                name,
                line,
                column,
            } => Diagnostic::new(self.error_id(), message.clone())
                .at(*line, *column)
                .detail("name", name.as_str()),
        }
    }
}
