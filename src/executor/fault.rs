//! Runtime faults
//!
//! A fault stops the current run. It always carries the position of the
//! statement or expression that raised it when one is known.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::errors::Diagnostic;
use crate::lowering::ir::Span;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NoMatchingArm,
    InvalidRepeatBound,
    UnknownAwaitTarget,
    PendingValue,
    ToolContractViolation,
    ToolFailed,
    UnknownTool,
    ParallelConflict,
    ParallelEffect,
    Cancelled,
    UnknownFlow,
    MultipleFlows,
    NoFlows,
    InvalidInput,
    MissingOutput,
    UnknownName,
    UnknownRecord,
    MissingField,
    IndexOutOfRange,
    TypeMismatch,
    DivisionByZero,
    NumericOverflow,
    InvalidTimeAmount,
    CallDepthExceeded,
    Store,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::NoMatchingArm => "no_matching_arm",
            FaultKind::InvalidRepeatBound => "invalid_repeat_bound",
            FaultKind::UnknownAwaitTarget => "unknown_await_target",
            FaultKind::PendingValue => "pending_value",
            FaultKind::ToolContractViolation => "tool_contract_violation",
            FaultKind::ToolFailed => "tool_failed",
            FaultKind::UnknownTool => "unknown_tool",
            FaultKind::ParallelConflict => "parallel_conflict",
            FaultKind::ParallelEffect => "parallel_effect",
            FaultKind::Cancelled => "cancelled",
            FaultKind::UnknownFlow => "unknown_flow",
            FaultKind::MultipleFlows => "multiple_flows",
            FaultKind::NoFlows => "no_flows",
            FaultKind::InvalidInput => "invalid_input",
            FaultKind::MissingOutput => "missing_output",
            FaultKind::UnknownName => "unknown_name",
            FaultKind::UnknownRecord => "unknown_record",
            FaultKind::MissingField => "missing_field",
            FaultKind::IndexOutOfRange => "index_out_of_range",
            FaultKind::TypeMismatch => "type_mismatch",
            FaultKind::DivisionByZero => "division_by_zero",
            FaultKind::NumericOverflow => "numeric_overflow",
            FaultKind::InvalidTimeAmount => "invalid_time_amount",
            FaultKind::CallDepthExceeded => "call_depth_exceeded",
            FaultKind::Store => "store",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RuntimeFault {
    pub kind: FaultKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, JsonValue>,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            column: None,
            details: BTreeMap::new(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.line = Some(span.line);
        self.column = Some(span.column);
        self
    }

    /// Attach `span` only when no inner position was recorded.
    pub fn or_at(self, span: Span) -> Self {
        if self.line.is_some() {
            self
        } else {
            self.at(span)
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled, "Run was cancelled")
    }

    pub fn type_mismatch(message: impl Into<String>, span: Span) -> Self {
        Self::new(FaultKind::TypeMismatch, message).at(span)
    }

    /// Store failures keep the store's own error id in the details.
    pub fn store(err: StoreError, span: Option<Span>) -> Self {
        let mut fault = Self::new(FaultKind::Store, err.to_string()).detail("store_error", err.error_id());
        if let StoreError::ConstraintViolation { schema, field, .. } = &err {
            fault = fault
                .detail("schema", schema.as_str())
                .detail("field", field.as_str());
        }
        match span {
            Some(span) => fault.at(span),
            None => fault,
        }
    }

    pub fn error_id(&self) -> String {
        format!("runtime.{}", self.kind)
    }

    pub fn position(&self) -> Option<(u32, u32)> {
        Some((self.line?, self.column?))
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let mut diagnostic = Diagnostic::new(self.error_id(), self.message.clone());
        if let Some((line, column)) = self.position() {
            diagnostic = diagnostic.at(line, column);
        }
        for (key, value) in &self.details {
            diagnostic = diagnostic.detail(key, value.clone());
        }
        diagnostic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_carries_kind_and_position() {
        let fault = RuntimeFault::new(FaultKind::NoMatchingArm, "No case matched 3")
            .at(Span::new(4, 3))
            .detail("value", "3");
        let diagnostic = fault.diagnostic();
        assert_eq!(diagnostic.error_id, "runtime.no_matching_arm");
        assert_eq!((diagnostic.line, diagnostic.column), (Some(4), Some(3)));
        assert_eq!(diagnostic.details["value"], "3");
    }

    #[test]
    fn test_or_at_keeps_inner_position() {
        let fault = RuntimeFault::new(FaultKind::UnknownName, "Unknown variable 'x'")
            .at(Span::new(2, 9))
            .or_at(Span::new(2, 1));
        assert_eq!(fault.position(), Some((2, 9)));
    }

    #[test]
    fn test_store_fault_keeps_store_id() {
        let fault = RuntimeFault::store(StoreError::NestedTransaction, None);
        assert_eq!(fault.kind, FaultKind::Store);
        assert_eq!(fault.details["store_error"], "store.nested_transaction");
        assert_eq!(fault.position(), None);
    }
}
