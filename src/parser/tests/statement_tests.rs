//! Tests for statements and block layout

use super::helpers::{error_message, flow_body, parse_err};
use crate::parser::ast::*;
use crate::parser::ParseError;

#[test]
fn test_return_literal() {
    let body = flow_body("flow \"demo\":\n  return \"ok\"\n");
    assert_eq!(body.len(), 1);
    match &body[0] {
        Stmt::Return { value, span } => {
            assert_eq!(*span, Span::new(2, 3));
            assert!(matches!(
                value,
                Expr::Literal { value: Literal::Text(s), .. } if s == "ok"
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_let_forms() {
    let source = r#"
flow "f":
  let rate is 3 constant
  let:
    a is 1
    b is a + 1
  return b
"#;
    let body = flow_body(source);
    assert_eq!(body.len(), 4);
    assert!(matches!(&body[0], Stmt::Let { name, constant: true, .. } if name == "rate"));
    assert!(matches!(&body[1], Stmt::Let { name, constant: false, .. } if name == "a"));
    assert!(matches!(&body[2], Stmt::Let { name, .. } if name == "b"));
}

#[test]
fn test_reserved_word_as_let_target() {
    let err = parse_err("flow \"f\":\n  let flow is 1\n");
    match &err {
        ParseError::ReservedIdentifier {
            keyword,
            suggestion,
            line,
            column,
        } => {
            assert_eq!(keyword, "flow");
            assert!(suggestion.contains("flow"));
            assert_eq!((*line, *column), (2, 7));
        }
        other => panic!("unexpected {:?}", other),
    }
    let diagnostic = err.diagnostic();
    assert_eq!(diagnostic.error_id, "parse.reserved_identifier");
    assert_eq!(diagnostic.details["keyword"], "flow");
    assert_eq!(diagnostic.details["error_id"], "parse.reserved_identifier");
    assert!(diagnostic.message.contains("my_flow"));
}

#[test]
fn test_escaped_reserved_word_is_a_plain_name() {
    let body = flow_body("flow \"f\":\n  let `flow` is 1\n  return `flow`\n");
    assert!(matches!(&body[0], Stmt::Let { name, .. } if name == "flow"));
}

#[test]
fn test_set_targets() {
    let source = r#"
flow "f":
  let basket is {total: 1}
  set basket.total is 2
  set state.cart.count is 3
  set state.profile with:
    name is "Ada"
    text is "hi"
"#;
    let body = flow_body(source);
    match &body[1] {
        Stmt::Set { target, .. } => {
            assert_eq!(target.root, TargetRoot::Local);
            assert_eq!(target.path, vec!["basket", "total"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &body[2] {
        Stmt::Set { target, .. } => {
            assert_eq!(target.root, TargetRoot::State);
            assert_eq!(target.path, vec!["cart", "count"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &body[3] {
        Stmt::SetWith { target, fields, .. } => {
            assert_eq!(target.path, vec!["profile"]);
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[1].name, "text");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_if_else_if_chain() {
    let source = r#"
flow "f":
  if x is greater than 10:
    return "big"
  else if x is greater than 5:
    return "medium"
  else:
    return "small"
"#;
    let body = flow_body(source);
    assert_eq!(body.len(), 1);
    match &body[0] {
        Stmt::If { else_body, .. } => {
            assert_eq!(else_body.len(), 1);
            match &else_body[0] {
                Stmt::If { else_body, .. } => assert_eq!(else_body.len(), 1),
                other => panic!("unexpected {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_if_without_colon() {
    let err = parse_err("flow \"f\":\n  if x\n    return 1\n");
    assert!(error_message(&err).starts_with("Expected ':' after condition"));
    assert_eq!(err.position().0, 2);
}

#[test]
fn test_repeat_and_for_each() {
    let source = r#"
flow "f":
  repeat up to 3 times:
    tick
  for each item in input.items:
    advance time by 2
"#;
    let body = flow_body(source);
    match &body[0] {
        Stmt::Repeat { body, .. } => assert!(matches!(&body[0], Stmt::AdvanceTime { .. })),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(&body[1], Stmt::ForEach { item, .. } if item == "item"));
}

#[test]
fn test_repeat_header_must_be_complete() {
    let err = parse_err("flow \"f\":\n  repeat up to 3:\n    tick\n");
    assert!(error_message(&err).contains("Expected 'times'"));
}

#[test]
fn test_match_rules() {
    let ok = r#"
flow "f":
  match status:
    when "open":
      return 1
    otherwise:
      return 0
"#;
    match &flow_body(ok)[0] {
        Stmt::Match {
            arms, otherwise, ..
        } => {
            assert_eq!(arms.len(), 1);
            assert!(otherwise.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }

    let empty = "flow \"f\":\n  match status:\n    otherwise:\n      return 0\n";
    assert_eq!(
        error_message(&parse_err(empty)),
        "Match must have at least one case"
    );

    let unreachable = r#"
flow "f":
  match status:
    when 1:
      return 1
    otherwise:
      return 0
    when 2:
      return 2
"#;
    assert_eq!(
        error_message(&parse_err(unreachable)),
        "Unreachable case after otherwise"
    );

    let duplicate = r#"
flow "f":
  match status:
    when 1:
      return 1
    otherwise:
      return 0
    otherwise:
      return 2
"#;
    assert_eq!(
        error_message(&parse_err(duplicate)),
        "Duplicate otherwise in match"
    );
}

#[test]
fn test_parallel_tasks_keep_declaration_order() {
    let source = r#"
flow "f":
  parallel:
    run "beta":
      let beta is 2
    run "alpha":
      let alpha is 1
"#;
    match &flow_body(source)[0] {
        Stmt::Parallel { tasks, .. } => {
            let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["beta", "alpha"]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_parallel_duplicate_task() {
    let source = r#"
flow "f":
  parallel:
    run "a":
      let x is 1
    run "a":
      let y is 2
"#;
    assert_eq!(
        error_message(&parse_err(source)),
        "Task \"a\" is declared more than once."
    );
}

#[test]
fn test_tool_call_and_async_binding() {
    let source = r#"
flow "f":
  let weather is get weather:
    city is "Oslo"
    days is 3
  let pending is async get weather:
    city is "Rome"
  await pending
"#;
    let body = flow_body(source);
    match &body[0] {
        Stmt::Let {
            value: Expr::ToolCall(call),
            ..
        } => {
            assert_eq!(call.tool, "get weather");
            assert_eq!(call.args.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(&body[1], Stmt::AsyncLet { name, call, .. }
        if name == "pending" && call.tool == "get weather"));
    assert!(matches!(&body[2], Stmt::Await { name, .. } if name == "pending"));
}

#[test]
fn test_duplicate_tool_field() {
    let source = "flow \"f\":\n  let w is lookup:\n    city is 1\n    city is 2\n";
    assert_eq!(
        error_message(&parse_err(source)),
        "Duplicate tool field 'city'"
    );
}

#[test]
fn test_call_flow_sections() {
    let source = r#"
flow "f":
  let result is call flow "price":
    input:
      amount is 10
    output:
      total
      tax
"#;
    match &flow_body(source)[0] {
        Stmt::Let {
            value:
                Expr::CallFlow {
                    kind,
                    target,
                    args,
                    outputs,
                    ..
                },
            ..
        } => {
            assert_eq!(*kind, FlowKind::Flow);
            assert_eq!(target, "price");
            assert_eq!(args[0].name, "amount");
            assert_eq!(outputs.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }

    let missing_output = "flow \"f\":\n  let r is call pipeline \"p\":\n    input:\n      a is 1\n";
    assert!(error_message(&parse_err(missing_output)).contains("requires an output block"));

    let duplicate_input = r#"
flow "f":
  let r is call flow "p":
    input:
      a is 1
      a is 2
    output:
      b
"#;
    assert_eq!(
        error_message(&parse_err(duplicate_input)),
        "Duplicate input 'a'"
    );
}

#[test]
fn test_records_and_jobs() {
    let source = r#"
flow "f":
  save "Order" with {sku: "A"} as saved
  find "Order" where total is at least 5
  enqueue job "nightly"
"#;
    let body = flow_body(source);
    assert!(matches!(&body[0], Stmt::Save { binding: Some(b), .. } if b == "saved"));
    assert!(matches!(&body[1], Stmt::Find { binding: None, record, .. } if record.name == "Order"));
    assert!(matches!(&body[2], Stmt::Enqueue { job, .. } if job.name == "nightly"));
}

#[test]
fn test_flow_calls_only_as_values() {
    let err = parse_err("flow \"f\":\n  return call flow \"x\"\n");
    assert!(error_message(&err).contains("only allowed on the right"));
}
