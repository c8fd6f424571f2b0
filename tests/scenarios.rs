//! End-to-end scenarios through the public pipeline.

use std::sync::Arc;

use namel3ss_core::executor::{Executor, FaultKind, FlowInvocation, ToolRegistry};
use namel3ss_core::lowering::lower;
use namel3ss_core::parser::{parse_source, print_program};
use namel3ss_core::store::StoreHandle;
use namel3ss_core::{load_program, SourceFile, Value};

fn executor(source: &str) -> Executor {
    let program = load_program(&[SourceFile::new("app.ai", source)]).expect("load failed");
    Executor::new(
        Arc::new(program),
        StoreHandle::memory(),
        Arc::new(ToolRegistry::new()),
    )
}

#[test]
fn test_demo_returns_ok() {
    let executor = executor("flow \"demo\":\n  return \"ok\"\n");
    let outcome = tokio_test::block_on(executor.run(FlowInvocation::new(None))).unwrap();
    assert_eq!(outcome.value, Value::text("ok"));
}

#[tokio::test]
async fn test_two_flows_without_target_execute_nothing() {
    let source = r#"
record "Order":
  sku text
flow "first":
  save "Order" with {sku: "A"}
  return 1
flow "second":
  save "Order" with {sku: "B"}
  return 2
"#;
    let executor = executor(source);
    let fault = executor.run(FlowInvocation::new(None)).await.unwrap_err();
    assert_eq!(fault.kind, FaultKind::MultipleFlows);
    assert!(fault.message.to_lowercase().contains("multiple flows found"));

    let schema = executor.program().record("Order").unwrap().clone();
    assert!(executor.store().store().list(&schema).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_parallel_merge_follows_declaration_order() {
    let source = r#"
flow "fan out":
  parallel:
    run "beta":
      let beta is 2
    run "alpha":
      let alpha is 1
  return beta + alpha
"#;
    let outcome = executor(source)
        .run(FlowInvocation::new(None))
        .await
        .unwrap();
    assert_eq!(outcome.locals.keys().collect::<Vec<_>>(), vec!["beta", "alpha"]);
    assert_eq!(outcome.value, Value::int(3));
}

#[test]
fn test_reserved_keyword_binding() {
    let err = load_program(&[SourceFile::new("app.ai", "flow \"f\":\n  let flow is 1\n")])
        .unwrap_err();
    let diagnostic = err.diagnostic();
    assert_eq!(diagnostic.error_id, "parse.reserved_identifier");
    assert_eq!(diagnostic.details["keyword"], "flow");
    assert!(diagnostic.message.contains("flow"));
}

#[test]
fn test_pure_flow_cannot_save() {
    let source = r#"
record "Order":
  sku text
flow "pure save":
  purity is "pure"
  save "Order" with {sku: "A"}
"#;
    let diagnostic = load_program(&[SourceFile::new("app.ai", source)])
        .unwrap_err()
        .diagnostic();
    assert_eq!(diagnostic.error_id, "lowering.purity_violation");
    assert_eq!(diagnostic.line, Some(6));
}

const SHOP: &str = r#"
spec is "1.0"
alias "Money" is number
record "Order":
  sku text must be present
  total Money must be at least 0
  order by total
flow "checkout":
  input:
    amount is Money
  save "Order" with {sku: "A", total: input.amount}
  find "Order" where total is at least 1
  return order_results
"#;

#[test]
fn test_lowering_is_idempotent() {
    let ast = parse_source(SHOP).unwrap();
    let first = lower(&ast).unwrap();
    let second = lower(&ast).unwrap();
    assert_eq!(first.canonical_json(), second.canonical_json());
    assert_eq!(first.hash(), second.hash());
}

/// Canonical IR with every source position removed.
fn without_positions(source: &str) -> serde_json::Value {
    fn strip(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                map.retain(|key, _| !matches!(key.as_str(), "span" | "line" | "column"));
                map.values_mut().for_each(strip);
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(strip),
            _ => {}
        }
    }
    let program = lower(&parse_source(source).unwrap()).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&program.canonical_json()).unwrap();
    strip(&mut value);
    value
}

#[test]
fn test_print_round_trip() {
    let printed = print_program(&parse_source(SHOP).unwrap());
    let reprinted = print_program(&parse_source(&printed).unwrap());
    assert_eq!(printed, reprinted);
    assert_eq!(without_positions(&printed), without_positions(SHOP));
}
