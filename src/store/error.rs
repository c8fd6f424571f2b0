use thiserror::Error;

use crate::errors::Diagnostic;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("A transaction is already active")]
    NestedTransaction,

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("{message}")]
    ConstraintViolation {
        schema: String,
        field: String,
        message: String,
    },

    #[error("Stored data for '{schema}' could not be decoded: {message}")]
    Codec { schema: String, message: String },

    #[error("Storage backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

impl StoreError {
    pub fn error_id(&self) -> &'static str {
        match self {
            StoreError::NestedTransaction => "store.nested_transaction",
            StoreError::NoActiveTransaction => "store.no_active_transaction",
            StoreError::ConstraintViolation { .. } => "store.constraint_violation",
            StoreError::Codec { .. } => "store.codec",
            StoreError::Backend(_) => "store.backend",
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::new(self.error_id(), self.to_string());
        match self {
            StoreError::ConstraintViolation { schema, field, .. } => diagnostic
                .detail("schema", schema.as_str())
                .detail("field", field.as_str()),
            StoreError::Codec { schema, .. } => diagnostic.detail("schema", schema.as_str()),
            _ => diagnostic,
        }
    }
}
