//! Lowering errors

use crate::errors::Diagnostic;
use crate::parser::ast::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum LoweringError {
    UnknownReference {
        what: String,
        name: String,
        line: u32,
        column: u32,
        source: u32,
    },

    DuplicateDeclaration {
        what: String,
        name: String,
        line: u32,
        column: u32,
        source: u32,
    },

    PurityViolation {
        flow: String,
        message: String,
        line: u32,
        column: u32,
        source: u32,
    },

    ArityMismatch {
        target: String,
        message: String,
        line: u32,
        column: u32,
        source: u32,
    },

    InvalidType {
        name: String,
        message: String,
        line: u32,
        column: u32,
        source: u32,
    },

    InvalidDeclaration {
        message: String,
        line: u32,
        column: u32,
        source: u32,
    },

    /// A statement that is not allowed where it appears
    InvalidStatement {
        message: String,
        line: u32,
        column: u32,
        source: u32,
    },
}

// `Display`/`Error` are implemented by hand: thiserror would treat the
// `source: u32` field as the error's cause, which a `u32` cannot be.
impl std::fmt::Display for LoweringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoweringError::UnknownReference { what, name, .. } => {
                write!(f, "Unknown {what} '{name}'")
            }
            LoweringError::DuplicateDeclaration { what, name, .. } => {
                write!(f, "Duplicate {what} '{name}'")
            }
            LoweringError::PurityViolation { message, .. }
            | LoweringError::ArityMismatch { message, .. }
            | LoweringError::InvalidType { message, .. }
            | LoweringError::InvalidDeclaration { message, .. }
            | LoweringError::InvalidStatement { message, .. } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for LoweringError {}

impl LoweringError {
    pub fn unknown(what: &str, name: &str, span: Span) -> Self {
        LoweringError::UnknownReference {
            what: what.to_string(),
            name: name.to_string(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn duplicate(what: &str, name: &str, span: Span) -> Self {
        LoweringError::DuplicateDeclaration {
            what: what.to_string(),
            name: name.to_string(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn impure(flow: &str, message: impl Into<String>, span: Span) -> Self {
        LoweringError::PurityViolation {
            flow: flow.to_string(),
            message: message.into(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn arity(target: &str, message: impl Into<String>, span: Span) -> Self {
        LoweringError::ArityMismatch {
            target: target.to_string(),
            message: message.into(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn invalid_type(name: &str, message: impl Into<String>, span: Span) -> Self {
        LoweringError::InvalidType {
            name: name.to_string(),
            message: message.into(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn invalid_declaration(message: impl Into<String>, span: Span) -> Self {
        LoweringError::InvalidDeclaration {
            message: message.into(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn invalid_statement(message: impl Into<String>, span: Span) -> Self {
        LoweringError::InvalidStatement {
            message: message.into(),
            line: span.line,
            column: span.column,
            source: span.source,
        }
    }

    pub fn error_id(&self) -> &'static str {
        match self {
            LoweringError::UnknownReference { .. } => "lowering.unknown_reference",
            LoweringError::DuplicateDeclaration { .. } => "lowering.duplicate_declaration",
            LoweringError::PurityViolation { .. } => "lowering.purity_violation",
            LoweringError::ArityMismatch { .. } => "lowering.arity_mismatch",
            LoweringError::InvalidType { .. } => "lowering.invalid_type",
            LoweringError::InvalidDeclaration { .. } => "lowering.invalid_declaration",
            LoweringError::InvalidStatement { .. } => "lowering.invalid_statement",
        }
    }

    pub fn position(&self) -> (u32, u32) {
        match self {
            LoweringError::UnknownReference { line, column, .. }
            | LoweringError::DuplicateDeclaration { line, column, .. }
            | LoweringError::PurityViolation { line, column, .. }
            | LoweringError::ArityMismatch { line, column, .. }
            | LoweringError::InvalidType { line, column, .. }
            | LoweringError::InvalidDeclaration { line, column, .. }
            | LoweringError::InvalidStatement { line, column, .. } => (*line, *column),
        }
    }

    /// Index of the source file the failing node was parsed from.
    pub fn source(&self) -> u32 {
        match self {
            LoweringError::UnknownReference { source, .. }
            | LoweringError::DuplicateDeclaration { source, .. }
            | LoweringError::PurityViolation { source, .. }
            | LoweringError::ArityMismatch { source, .. }
            | LoweringError::InvalidType { source, .. }
            | LoweringError::InvalidDeclaration { source, .. }
            | LoweringError::InvalidStatement { source, .. } => *source,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let (line, column) = self.position();
        let diagnostic = Diagnostic::new(self.error_id(), self.to_string()).at(line, column);
        match self {
            LoweringError::UnknownReference { what, name, .. }
            | LoweringError::DuplicateDeclaration { what, name, .. } => {
                diagnostic.detail("what", what.as_str()).detail("name", name.as_str())
            }
            LoweringError::PurityViolation { flow, .. } => diagnostic.detail("flow", flow.as_str()),
            LoweringError::ArityMismatch { target, .. } => {
                diagnostic.detail("target", target.as_str())
            }
            LoweringError::InvalidType { name, .. } => diagnostic.detail("type", name.as_str()),
            _ => diagnostic,
        }
    }
}
