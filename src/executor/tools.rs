//! Tool dispatch
//!
//! The core owns the capability check and the output contract. Executing a
//! tool is delegated to a [`ToolExecutor`]; [`ToolRegistry`] is the in-process
//! one, mapping tool names to handlers.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use super::fault::{FaultKind, RuntimeFault};
use crate::capabilities::CapabilitySet;
use crate::lowering::ir::{Param, Span, Tool};
use crate::value::{Record, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Tool '{0}' has no registered handler")]
    NotRegistered(String),

    #[error("Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: &Tool, payload: Record) -> Result<Value, ToolError>;
}

/* ===================== Registry ===================== */

pub type ToolHandler =
    Arc<dyn Fn(Record) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn register_sync<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Record) -> Result<Value, String> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |payload| {
            let handler = handler.clone();
            async move { handler(payload) }
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool: &Tool, payload: Record) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(&tool.name)
            .ok_or_else(|| ToolError::NotRegistered(tool.name.clone()))?;
        handler(payload).await.map_err(|message| ToolError::Failed {
            tool: tool.name.clone(),
            message,
        })
    }
}

/* ===================== Invocation ===================== */

/// The outcome value of a call the grants do not cover. The tool is not run.
pub fn blocked_outcome(tool: &Tool, grants: &CapabilitySet) -> Option<Value> {
    let missing = grants.missing(&tool.capabilities)?;
    let outcome: Record = [
        ("status", Value::text("blocked")),
        (
            "reason",
            Value::text(format!(
                "Tool '{}' requires capability '{}'",
                tool.name, missing
            )),
        ),
        ("capability", Value::text(missing.as_str())),
    ]
    .into_iter()
    .collect();
    Some(Value::Record(outcome))
}

/// Run an approved call and check its result against the declared outputs.
pub async fn invoke(
    executor: Arc<dyn ToolExecutor>,
    tool: Tool,
    payload: Record,
    span: Span,
) -> Result<Value, RuntimeFault> {
    let call_span = info_span!("tool_call", tool = %tool.name);
    async move {
        check_inputs(&tool, &payload).map_err(|f| f.at(span))?;
        let result = executor.execute(&tool, payload).await.map_err(|e| {
            let kind = match e {
                ToolError::NotRegistered(_) => FaultKind::UnknownTool,
                ToolError::Failed { .. } => FaultKind::ToolFailed,
            };
            RuntimeFault::new(kind, e.to_string())
                .at(span)
                .detail("tool", tool.name.as_str())
        })?;
        let checked = check_outputs(&tool, result).map_err(|f| f.at(span))?;
        debug!("tool call finished");
        Ok(checked)
    }
    .instrument(call_span)
    .await
}

fn contract_fault(tool: &Tool, message: String) -> RuntimeFault {
    RuntimeFault::new(FaultKind::ToolContractViolation, message).detail("tool", tool.name.as_str())
}

fn check_inputs(tool: &Tool, payload: &Record) -> Result<(), RuntimeFault> {
    for param in &tool.inputs {
        let value = payload.get(&param.name).unwrap_or(&Value::Null);
        if !param.field_type.accepts(value) {
            return Err(contract_fault(
                tool,
                format!(
                    "Tool '{}' input '{}' expects {} but got {}",
                    tool.name,
                    param.name,
                    param.field_type,
                    value.type_name()
                ),
            ));
        }
    }
    Ok(())
}

/// Tools without declared outputs may return anything. Otherwise the result
/// is a record with exactly the declared fields, in declaration order.
fn check_outputs(tool: &Tool, result: Value) -> Result<Value, RuntimeFault> {
    if tool.outputs.is_empty() {
        return Ok(result);
    }
    let returned = result.type_name();
    let Value::Record(record) = result else {
        return Err(contract_fault(
            tool,
            format!(
                "Tool '{}' must return a record but returned {}",
                tool.name, returned
            ),
        ));
    };
    if let Some(extra) = record.keys().find(|k| !declares(&tool.outputs, k)) {
        return Err(contract_fault(
            tool,
            format!("Tool '{}' returned undeclared output '{}'", tool.name, extra),
        ));
    }
    let mut shaped = Record::new();
    for param in &tool.outputs {
        let Some(value) = record.get(&param.name) else {
            return Err(contract_fault(
                tool,
                format!("Tool '{}' did not return output '{}'", tool.name, param.name),
            ));
        };
        if !param.field_type.accepts(value) {
            return Err(contract_fault(
                tool,
                format!(
                    "Tool '{}' output '{}' expects {} but got {}",
                    tool.name,
                    param.name,
                    param.field_type,
                    value.type_name()
                ),
            ));
        }
        shaped.insert(param.name.clone(), value.clone());
    }
    Ok(Value::Record(shaped))
}

fn declares(params: &[Param], name: &str) -> bool {
    params.iter().any(|p| p.name == name)
}
