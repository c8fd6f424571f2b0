//! Shared diagnostic shape and the crate-wide error umbrella
//!
//! Every layer owns a typed error (`LexError`, `ParseError`, `LoweringError`,
//! `RuntimeFault`, `StoreError`). They all project onto [`Diagnostic`], which
//! is what renderers (CLI, editors) consume. The core never formats
//! human-facing text beyond the message itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::executor::RuntimeFault;
use crate::lexer::LexError;
use crate::lowering::LoweringError;
use crate::parser::ParseError;
use crate::store::StoreError;

/* ===================== Diagnostic ===================== */

/// Structured, position-carrying description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable identifier such as `parse.reserved_identifier`
    pub error_id: String,
    pub message: String,
    /// 1-based line, when the failure has a source position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, JsonValue>,
    /// Source file the position refers to (set by the program loader)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Diagnostic {
    pub fn new(error_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_id: error_id.into(),
            message: message.into(),
            line: None,
            column: None,
            details: BTreeMap::new(),
            file: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/* ===================== Umbrella Error ===================== */

#[derive(Debug, Error)]
pub enum Namel3ssError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Lowering(#[from] LoweringError),

    #[error(transparent)]
    Runtime(#[from] RuntimeFault),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A load error attributed to one source file
    #[error("{file}: {source}")]
    InFile {
        file: String,
        #[source]
        source: Box<Namel3ssError>,
    },
}

impl Namel3ssError {
    pub fn in_file(self, file: impl Into<String>) -> Self {
        Namel3ssError::InFile {
            file: file.into(),
            source: Box::new(self),
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            Namel3ssError::Lex(e) => e.diagnostic(),
            Namel3ssError::Parse(e) => e.diagnostic(),
            Namel3ssError::Lowering(e) => e.diagnostic(),
            Namel3ssError::Runtime(e) => e.diagnostic(),
            Namel3ssError::Store(e) => e.diagnostic(),
            Namel3ssError::InFile { file, source } => source.diagnostic().in_file(file.clone()),
        }
    }
}
