use super::*;
use crate::parser::parse_source;
use crate::schema::BaseType;

fn lower_ok(source: &str) -> ir::Program {
    let program = parse_source(source).expect("parse failed");
    lower(&program).expect("lowering failed")
}

fn lower_err(source: &str) -> LoweringError {
    let program = parse_source(source).expect("parse failed");
    lower(&program).expect_err("lowering should fail")
}

const SHOP: &str = r#"
spec is "1.0"
alias "Money" is number
record "Order":
  sku text must be present
  total Money must be at least 0
  order by total
tool "get weather":
  capability is "network"
  input:
    city is text
  output:
    temperature is number
tool "shout":
  input:
    phrase is text
flow "price":
  purity is "pure"
  input:
    amount is number
  output:
    total is number
  return {total: input.amount * 2}
flow "checkout":
  input:
    amount is number
  let priced is call flow "price":
    input:
      amount is input.amount
    output:
      total
  save "Order" with {sku: "A", total: priced.total}
  find "Order" where total is at least 1
  set state.last is priced.total
  return order_results
policy "outbound":
  flow is "checkout"
  grant "network"
route "checkout":
  path is "/checkout"
  method is "post"
  request:
    amount is number
  response:
    ok is boolean
  flow is "checkout"
"#;

#[test]
fn test_lowers_tables_and_types() {
    let program = lower_ok(SHOP);
    assert_eq!(program.aliases["Money"], BaseType::Number);
    let order = &program.records["Order"];
    assert_eq!(order.fields[1].field_type, BaseType::Number);
    assert_eq!(order.order_by.as_deref(), Some("total"));

    let weather = program.tool("get weather").unwrap();
    assert_eq!(weather.purity, Purity::Effectful);
    assert_eq!(program.tool("shout").unwrap().purity, Purity::Pure);

    let checkout = program.flow("checkout").unwrap();
    assert_eq!(checkout.purity, Purity::Effectful);
    assert!(matches!(
        &checkout.body[2],
        ir::Stmt::Find { binding, .. } if binding == "order_results"
    ));
    assert_eq!(
        program.policy_grants("checkout"),
        vec![Capability::Network]
    );
    assert!(program.policy_grants("price").is_empty());
}

#[test]
fn test_names_resolve_to_context_roots() {
    let program = lower_ok("flow \"f\":\n  let a is input.x\n  return a\n");
    let body = &program.flow("f").unwrap().body;
    match &body[0] {
        ir::Stmt::Let {
            value: ir::Expr::Attr { object, .. },
            ..
        } => assert!(matches!(object.as_ref(), ir::Expr::Input { .. })),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        &body[1],
        ir::Stmt::Return { value: ir::Expr::Local { name, .. }, .. } if name == "a"
    ));
}

#[test]
fn test_lowering_is_deterministic() {
    let first = lower_ok(SHOP);
    let second = lower_ok(SHOP);
    assert_eq!(first.canonical_json(), second.canonical_json());
    assert_eq!(first.hash(), second.hash());
    assert_eq!(first.hash().len(), 64);

    // Declaration order does not change the IR tables
    let reordered = SHOP.replace(
        "tool \"shout\":\n  input:\n    phrase is text\n",
        "",
    ) + "tool \"shout\":\n  input:\n    phrase is text\n";
    assert!(lower_ok(&reordered).tools.keys().eq(first.tools.keys()));
}

#[test]
fn test_canonical_json_sorts_keys() {
    let json = lower_ok("flow \"f\":\n  return 1\n").canonical_json();
    let agents = json.find("\"agents\"").unwrap();
    let flows = json.find("\"flows\"").unwrap();
    let tools = json.find("\"tools\"").unwrap();
    assert!(agents < flows && flows < tools);
    assert!(!json.contains(' '));
}

#[test]
fn test_pure_flow_with_save_fails() {
    let source = r#"
record "Note":
  body text
flow "f":
  purity is "pure"
  save "Note" with {body: "x"}
"#;
    let err = lower_err(source);
    assert_eq!(err.error_id(), "lowering.purity_violation");
    assert_eq!(err.position(), (6, 3));
}

#[test]
fn test_pure_flow_effects() {
    let state_write = "flow \"f\":\n  purity is \"pure\"\n  set state.count is 1\n";
    assert!(lower_err(state_write).to_string().contains("cannot change state"));

    let capability_tool = r#"
tool "fetch":
  capability is "network"
flow "f":
  purity is "pure"
  let fetched is fetch:
"#;
    assert!(lower_err(capability_tool)
        .to_string()
        .contains("effectful tool 'fetch'"));

    let effectful_callee = r#"
flow "g":
  input:
    n is number
  return 1
flow "f":
  purity is "pure"
  let r is call flow "g":
    input:
      n is 1
    output:
      n
"#;
    assert!(lower_err(effectful_callee)
        .to_string()
        .contains("effectful flow 'g'"));

    let pure_tool = r#"
tool "shout":
  input:
    phrase is text
flow "f":
  purity is "pure"
  let loud is shout:
    phrase is "hi"
  return loud
"#;
    lower_ok(pure_tool);
}

#[test]
fn test_unknown_references() {
    let cases = [
        ("flow \"f\":\n  save \"Missing\" with {a: 1}\n", "record", "Missing"),
        ("flow \"f\":\n  enqueue job \"nightly\"\n", "job", "nightly"),
        ("flow \"f\":\n  let w is weather report:\n", "tool", "weather report"),
        (
            "tool \"t\":\n  capability is \"teleport\"\n",
            "capability",
            "teleport",
        ),
        ("record \"R\":\n  a Money\n", "type", "Money"),
        ("policy \"p\":\n  flow is \"ghost\"\n", "flow", "ghost"),
        ("agent \"a\":\n  ai is \"brain\"\n", "ai", "brain"),
    ];
    for (source, what_expected, name_expected) in cases {
        match lower_err(source) {
            LoweringError::UnknownReference { what, name, .. } => {
                assert_eq!(what, what_expected, "{}", source);
                assert_eq!(name, name_expected, "{}", source);
            }
            other => panic!("unexpected {:?} for {}", other, source),
        }
    }
}

#[test]
fn test_call_targets() {
    let missing = r#"
flow "f":
  let r is call flow "ghost":
    input:
      a is 1
    output:
      b
"#;
    assert!(matches!(
        lower_err(missing),
        LoweringError::UnknownReference { ref what, ref name, .. } if what == "flow" && name == "ghost"
    ));

    let wrong_kind = r#"
flow "g":
  return {b: 1}
flow "f":
  let r is call pipeline "g":
    input:
      a is 1
    output:
      b
"#;
    assert!(matches!(
        lower_err(wrong_kind),
        LoweringError::UnknownReference { ref what, .. } if what == "pipeline"
    ));
}

#[test]
fn test_call_arity() {
    let base = r#"
flow "price":
  input:
    amount is number
  output:
    total is number
  return {total: input.amount}
"#;
    let wrong_input = format!(
        "{}flow \"f\":\n  let r is call flow \"price\":\n    input:\n      amonut is 1\n    output:\n      total\n",
        base
    );
    let err = lower_err(&wrong_input);
    assert_eq!(err.error_id(), "lowering.arity_mismatch");
    assert_eq!(err.to_string(), "Flow 'price' has no input 'amonut'");

    let wrong_output = format!(
        "{}flow \"f\":\n  let r is call flow \"price\":\n    input:\n      amount is 1\n    output:\n      tax\n",
        base
    );
    assert_eq!(
        lower_err(&wrong_output).to_string(),
        "Flow 'price' has no output 'tax'"
    );

    let tool = "tool \"shout\":\n  input:\n    phrase is text\nflow \"f\":\n  let r is shout:\n";
    assert_eq!(
        lower_err(tool).to_string(),
        "Tool 'shout' requires input 'phrase'"
    );
}

#[test]
fn test_parallel_task_restrictions() {
    let state_write = r#"
flow "f":
  parallel:
    run "a":
      set state.count is 1
"#;
    let err = lower_err(state_write);
    assert_eq!(err.to_string(), "Parallel tasks cannot change state");
    assert_eq!(err.error_id(), "lowering.invalid_statement");
    assert_eq!(err.position(), (5, 7));

    let early_return = "flow \"f\":\n  parallel:\n    run \"a\":\n      return 1\n";
    assert_eq!(
        lower_err(early_return).to_string(),
        "Parallel tasks cannot return"
    );

    let nested = "flow \"f\":\n  parallel:\n    run \"a\":\n      parallel:\n        run \"b\":\n          let x is 1\n";
    assert_eq!(
        lower_err(nested).to_string(),
        "Parallel blocks cannot be nested"
    );

    let reads = "flow \"f\":\n  let base is 1\n  parallel:\n    run \"a\":\n      let x is base + 1\n";
    lower_ok(reads);
}

#[test]
fn test_constants_cannot_change() {
    let source = "flow \"f\":\n  let rate is 3 constant\n  set rate is 4\n";
    let err = lower_err(source);
    assert_eq!(err.to_string(), "Cannot change constant 'rate'");
    assert_eq!(err.position(), (3, 3));
}

#[test]
fn test_duplicate_declarations() {
    let source = "flow \"f\":\n  return 1\npipeline \"f\":\n  return 2\n";
    match lower_err(source) {
        LoweringError::DuplicateDeclaration { what, name, line, .. } => {
            assert_eq!(what, "flow");
            assert_eq!(name, "f");
            assert_eq!(line, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    // Different categories may share a name
    lower_ok("flow \"shared\":\n  return 1\njob \"shared\":\n  flow is \"shared\"\n");
}

#[test]
fn test_routes() {
    let bad_path = "flow \"f\":\n  return 1\nroute \"r\":\n  path is \"orders\"\n  response:\n    ok is boolean\n  flow is \"f\"\n";
    assert_eq!(
        lower_err(bad_path).to_string(),
        "Route 'r' path must start with '/'"
    );

    let mistyped = r#"
flow "f":
  output:
    ok is boolean
  return {ok: true}
route "r":
  path is "/r"
  response:
    ok is text
  flow is "f"
"#;
    assert_eq!(lower_err(mistyped).error_id(), "lowering.invalid_type");
}

#[test]
fn test_alias_cycle() {
    let source = "alias \"A\" is \"B\"\nalias \"B\" is \"A\"\nrecord \"R\":\n  x A\n";
    let err = lower_err(source);
    assert_eq!(err.error_id(), "lowering.invalid_type");
    assert!(err.diagnostic().message.contains("cycle"));
}

#[test]
fn test_results_binding() {
    assert_eq!(results_binding("Order"), "order_results");
    assert_eq!(results_binding("Line Item"), "line_item_results");
}
