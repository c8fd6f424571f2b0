use super::helpers::*;
use crate::executor::{FaultKind, FlowInvocation};
use crate::value::Value;

#[tokio::test]
async fn test_demo_flow_returns_ok() {
    let outcome = run("flow \"demo\":\n  return \"ok\"\n").await.unwrap();
    assert_eq!(outcome.flow, "demo");
    assert_eq!(outcome.value, Value::text("ok"));
    assert_eq!(
        outcome.to_canonical_json(),
        r#"{"flow":"demo","value":"ok","locals":{},"clock":0,"jobs":[]}"#
    );
}

#[tokio::test]
async fn test_body_without_return_yields_null() {
    let value = run_value("flow \"quiet\":\n  let alpha is 1\n").await;
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn test_multiple_flows_need_a_name() {
    let source = r#"
flow "first":
  set state.touched is true
  return 1
flow "second":
  return 2
"#;
    let executor = executor(source);
    let fault = executor.run(FlowInvocation::new(None)).await.unwrap_err();
    assert_eq!(fault.kind, FaultKind::MultipleFlows);
    assert!(fault.message.to_lowercase().contains("multiple flows found"));
    assert!(executor.store().store().load_state().await.unwrap().is_empty());

    let outcome = executor
        .run(FlowInvocation::new(Some("second")))
        .await
        .unwrap();
    assert_eq!(outcome.value, Value::int(2));
}

#[tokio::test]
async fn test_unknown_flow() {
    let executor = executor("flow \"demo\":\n  return 1\n");
    let fault = executor
        .run(FlowInvocation::new(Some("missing")))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::UnknownFlow);
    assert_eq!(fault.message, "Unknown flow 'missing'");
    assert_eq!(fault.error_id(), "runtime.unknown_flow");
}

#[tokio::test]
async fn test_program_without_flows() {
    let fault = run("record \"Order\":\n  sku text\n").await.unwrap_err();
    assert_eq!(fault.kind, FaultKind::NoFlows);
}

#[tokio::test]
async fn test_declared_inputs_are_checked() {
    let source = r#"
flow "double":
  input:
    amount is number
  return input.amount * 2
"#;
    let executor = executor(source);
    let outcome = executor
        .run(FlowInvocation::new(None).with_input(record(vec![("amount", Value::int(4))])))
        .await
        .unwrap();
    assert_eq!(outcome.value, Value::int(8));

    let missing = executor.run(FlowInvocation::new(None)).await.unwrap_err();
    assert_eq!(missing.kind, FaultKind::InvalidInput);
    assert_eq!(missing.message, "Flow 'double' requires input 'amount'");

    let wrong = executor
        .run(FlowInvocation::new(None).with_input(record(vec![("amount", Value::text("four"))])))
        .await
        .unwrap_err();
    assert_eq!(wrong.kind, FaultKind::InvalidInput);

    let extra = executor
        .run(FlowInvocation::new(None).with_input(record(vec![
            ("amount", Value::int(1)),
            ("sku", Value::text("A")),
        ])))
        .await
        .unwrap_err();
    assert_eq!(extra.message, "Flow 'double' has no input 'sku'");
}

#[tokio::test]
async fn test_identity_attributes() {
    let source = "flow \"whoami\":\n  return identity.role\n";
    let executor = executor(source);
    let outcome = executor
        .run(FlowInvocation::new(None).with_identity(record(vec![("role", Value::text("admin"))])))
        .await
        .unwrap();
    assert_eq!(outcome.value, Value::text("admin"));

    let fault = executor.run(FlowInvocation::new(None)).await.unwrap_err();
    assert_eq!(fault.kind, FaultKind::MissingField);
    assert_eq!(fault.message, "Identity is missing 'role'");
    assert_eq!(fault.position().map(|(line, _)| line), Some(2));
}

#[tokio::test]
async fn test_logical_clock() {
    let source = r#"
flow "clock":
  tick
  advance time by 5
  return "done"
"#;
    let outcome = run(source).await.unwrap();
    assert_eq!(outcome.clock, 6);

    let fault = run_fault("flow \"clock\":\n  advance time by 1.5\n").await;
    assert_eq!(fault.kind, FaultKind::InvalidTimeAmount);
}

#[tokio::test]
async fn test_call_flow_shapes_outputs() {
    let source = r#"
flow "price":
  purity is "pure"
  input:
    amount is number
  output:
    total is number
  return {total: input.amount * 2, note: "internal"}
flow "checkout":
  let priced is call flow "price":
    input:
      amount is 10
    output:
      total
  return priced
"#;
    let outcome = executor(source)
        .run(FlowInvocation::new(Some("checkout")))
        .await
        .unwrap();
    assert_eq!(outcome.value.to_canonical_json(), r#"{"total":20}"#);
}

#[tokio::test]
async fn test_call_flow_missing_output() {
    let source = r#"
flow "price":
  input:
    amount is number
  output:
    total is number
  return {subtotal: input.amount}
flow "checkout":
  let priced is call flow "price":
    input:
      amount is 10
    output:
      total
  return priced
"#;
    let fault = executor(source)
        .run(FlowInvocation::new(Some("checkout")))
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::MissingOutput);
    assert_eq!(fault.message, "Flow 'price' did not return output 'total'");
}

#[tokio::test]
async fn test_enqueue_collects_jobs_in_order() {
    let source = r#"
flow "cleanup":
  return "clean"
job "nightly":
  flow is "cleanup"
job "hourly":
  flow is "cleanup"
flow "main":
  enqueue job "nightly"
  enqueue job "hourly"
  return "queued"
"#;
    let outcome = executor(source)
        .run(FlowInvocation::new(Some("main")))
        .await
        .unwrap();
    assert_eq!(outcome.jobs, vec!["nightly".to_string(), "hourly".to_string()]);
}

#[tokio::test]
async fn test_runs_are_reproducible() {
    let source = r#"
flow "report":
  let alpha is 0.1 + 0.2
  let beta is [alpha, "x"]
  tick 2
  return {sum: alpha, items: beta}
"#;
    let first = run(source).await.unwrap().to_canonical_json();
    let second = run(source).await.unwrap().to_canonical_json();
    assert_eq!(first, second);
    assert!(first.contains(r#""sum":0.3"#));
}
