//! Test helpers for executor tests
//!
//! Source goes through the whole pipeline (parse, lower) before it reaches
//! the executor, so the tests exercise the same IR a loaded program has.

use std::sync::Arc;

use crate::executor::{Executor, FlowInvocation, FlowOutcome, RuntimeFault, ToolRegistry};
use crate::lowering::{ir::Program, lower};
use crate::parser::parse_source;
use crate::store::StoreHandle;
use crate::value::{Record, Value};

pub fn program(source: &str) -> Arc<Program> {
    let ast = parse_source(source).expect("parse failed");
    Arc::new(lower(&ast).expect("lowering failed"))
}

pub fn executor(source: &str) -> Executor {
    executor_with(source, ToolRegistry::new())
}

pub fn executor_with(source: &str, tools: ToolRegistry) -> Executor {
    Executor::new(program(source), StoreHandle::memory(), Arc::new(tools))
}

/// Run the program's only flow with no input.
pub async fn run(source: &str) -> Result<FlowOutcome, RuntimeFault> {
    executor(source).run(FlowInvocation::new(None)).await
}

pub async fn run_value(source: &str) -> Value {
    run(source).await.expect("run faulted").value
}

pub async fn run_fault(source: &str) -> RuntimeFault {
    run(source).await.expect_err("run should fault")
}

pub fn record(pairs: Vec<(&str, Value)>) -> Record {
    pairs.into_iter().collect()
}
