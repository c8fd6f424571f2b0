use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::helpers::*;
use crate::capabilities::Capability;
use crate::executor::{FaultKind, FlowInvocation, ToolRegistry};
use crate::value::{Record, Value};

const FORECAST: &str = r#"
tool "get weather":
  capability is "network"
  input:
    city is text
  output:
    temperature is number
flow "forecast":
  let weather is get weather:
    city is "Oslo"
  return weather
"#;

fn counting_weather(calls: Arc<AtomicUsize>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register_sync("get weather", move |payload: Record| {
        calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(payload.get("city"), Some(&Value::text("Oslo")));
        Ok(Value::Record(record(vec![("temperature", Value::int(21))])))
    });
    tools
}

#[tokio::test]
async fn test_missing_grant_blocks_the_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor_with(FORECAST, counting_weather(calls.clone()));

    let outcome = executor.run(FlowInvocation::new(None)).await.unwrap();
    let blocked = outcome.value.as_record().unwrap();
    assert_eq!(blocked.get("status"), Some(&Value::text("blocked")));
    assert_eq!(blocked.get("capability"), Some(&Value::text("network")));
    assert_eq!(
        blocked.get("reason"),
        Some(&Value::text("Tool 'get weather' requires capability 'network'"))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invocation_grant_allows_the_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor_with(FORECAST, counting_weather(calls.clone()));

    let outcome = executor
        .run(FlowInvocation::new(None).grant(Capability::Network))
        .await
        .unwrap();
    assert_eq!(outcome.value.to_canonical_json(), r#"{"temperature":21}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_policy_grant_allows_the_call() {
    let source = format!(
        "{}policy \"outbound\":\n  flow is \"forecast\"\n  grant \"network\"\n",
        FORECAST
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor_with(&source, counting_weather(calls.clone()));

    let outcome = executor.run(FlowInvocation::new(None)).await.unwrap();
    assert_eq!(outcome.value.to_canonical_json(), r#"{"temperature":21}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_result_must_match_declared_outputs() {
    let mut tools = ToolRegistry::new();
    tools.register_sync("get weather", |_| {
        Ok(Value::Record(record(vec![("temperature", Value::text("warm"))])))
    });
    let fault = executor_with(FORECAST, tools)
        .run(FlowInvocation::new(None).grant(Capability::Network))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::ToolContractViolation);
    assert_eq!(fault.details["tool"], "get weather");
}

#[tokio::test]
async fn test_handler_failure_faults_the_run() {
    let mut tools = ToolRegistry::new();
    tools.register_sync("get weather", |_| Err("upstream timeout".to_string()));
    let fault = executor_with(FORECAST, tools)
        .run(FlowInvocation::new(None).grant(Capability::Network))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::ToolFailed);
    assert!(fault.message.contains("upstream timeout"));
}

#[tokio::test]
async fn test_unregistered_tool() {
    let fault = executor(FORECAST)
        .run(FlowInvocation::new(None).grant(Capability::Network))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::UnknownTool);
}

const ASYNC_FORECAST: &str = r#"
tool "get weather":
  input:
    city is text
  output:
    temperature is number
flow "forecast":
  let oslo is async get weather:
    city is "Oslo"
  let rome is async get weather:
    city is "Rome"
  await rome
  await oslo
  return [oslo.temperature, rome.temperature]
"#;

fn weather_by_city() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register("get weather", |payload: Record| async move {
        let temperature = match payload.get("city").and_then(Value::as_text) {
            Some("Rome") => 24,
            _ => 9,
        };
        Ok(Value::Record(record(vec![("temperature", Value::int(temperature))])))
    });
    tools
}

#[tokio::test]
async fn test_async_calls_resolve_on_await() {
    let outcome = executor_with(ASYNC_FORECAST, weather_by_city())
        .run(FlowInvocation::new(None))
        .await
        .unwrap();
    assert_eq!(outcome.value.to_canonical_json(), "[9,24]");
}

#[tokio::test]
async fn test_reading_a_pending_binding_faults() {
    let source = r#"
tool "get weather":
  input:
    city is text
flow "forecast":
  let oslo is async get weather:
    city is "Oslo"
  return oslo
"#;
    let fault = executor_with(source, weather_by_city())
        .run(FlowInvocation::new(None))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::PendingValue);
}

#[tokio::test]
async fn test_await_without_async_call() {
    let fault = run_fault("flow \"f\":\n  await nothing_here\n").await;
    assert_eq!(fault.kind, FaultKind::UnknownAwaitTarget);
    assert_eq!(fault.message, "Nothing to await for 'nothing_here'");
}

#[tokio::test]
async fn test_awaiting_a_blocked_call_is_a_no_op() {
    let source = r#"
tool "get weather":
  capability is "network"
  input:
    city is text
flow "forecast":
  let oslo is async get weather:
    city is "Oslo"
  await oslo
  return oslo.status
"#;
    assert_eq!(run_value(source).await, Value::text("blocked"));
}
