//! Tests for top-level declarations

use super::helpers::{error_message, parse_err, parse_ok};
use crate::lexer::tokenize;
use crate::parser::ast::*;
use crate::parser::{parse, ParseOptions};
use crate::schema::FieldConstraint;
use crate::value::Decimal;

#[test]
fn test_spec_version_and_modules() {
    let program = parse_ok("spec is \"1.0\"\nuse \"inventory\" as inv\ninclude \"shared\"\n");
    assert_eq!(program.spec_version.as_deref(), Some("1.0"));
    let uses: Vec<&UseDecl> = program.uses().collect();
    assert_eq!(uses.len(), 2);
    assert_eq!(uses[0].alias.as_deref(), Some("inv"));
    assert!(!uses[0].include);
    assert!(uses[1].include);
}

#[test]
fn test_require_spec_option() {
    let tokens = tokenize("flow \"f\":\n  return 1\n").unwrap();
    let options = ParseOptions {
        require_spec: true,
        ..ParseOptions::default()
    };
    assert!(parse(&tokens, &options).is_err());
    assert!(parse(&tokens, &ParseOptions::default()).is_ok());
}

#[test]
fn test_record_with_constraints() {
    let source = r#"
alias "Money" is number
record "Order":
  id number
  sku text must be present and must match pattern "^[A-Z]+$"
  total Money must be greater than 0
  note string must have length at most 140
  email text must be unique
  order by total
"#;
    let program = parse_ok(source);
    let Decl::Record(record) = &program.declarations[1] else {
        panic!("expected record");
    };
    assert_eq!(record.fields.len(), 5);
    assert_eq!(record.fields[1].type_ref.name, "text");
    assert_eq!(
        record.fields[1].constraints,
        vec![
            FieldConstraint::Present,
            FieldConstraint::Pattern("^[A-Z]+$".to_string())
        ]
    );
    assert_eq!(record.fields[2].type_ref.name, "Money");
    assert_eq!(
        record.fields[2].constraints,
        vec![FieldConstraint::GreaterThan(Decimal::ZERO)]
    );
    assert_eq!(
        record.fields[3].constraints,
        vec![FieldConstraint::MaxLength(140)]
    );
    assert_eq!(record.order_by.as_ref().map(|n| n.name.as_str()), Some("total"));
}

#[test]
fn test_flow_headers() {
    let source = r#"
pipeline "checkout":
  purity is "pure"
  input:
    amount is number
  output:
    total is number
  return {total: input.amount}
"#;
    let program = parse_ok(source);
    let flow = program.flows().next().unwrap();
    assert_eq!(flow.kind, FlowKind::Pipeline);
    assert_eq!(flow.purity, Some(Purity::Pure));
    assert_eq!(flow.inputs[0].name, "amount");
    assert_eq!(flow.outputs[0].type_ref.name, "number");
    assert_eq!(flow.body.len(), 1);
}

#[test]
fn test_duplicate_flow_input() {
    let source = "flow \"f\":\n  input:\n    a is number\n    a is text\n  return 1\n";
    assert_eq!(error_message(&parse_err(source)), "Duplicate input 'a'");
}

#[test]
fn test_tool_ai_agent_team_policy() {
    let source = r#"
tool "get weather":
  kind is "http"
  purity is "impure"
  capability is "network"
  input:
    city is text
  output:
    temperature is number
ai "assistant":
  model is "gpt-4o"
  provider is "openai"
  tools:
    expose "get weather"
agent "planner":
  ai is "assistant"
team "support":
  agent is "planner"
policy "outbound":
  flow is "fetch"
  grant "network"
job "nightly":
  flow is "cleanup"
  schedule is "daily"
prompt "summarize":
  version is "1"
  text is """Summarize
the text."""
"#;
    let program = parse_ok(source);
    assert_eq!(program.declarations.len(), 7);
    let Decl::Tool(tool) = &program.declarations[0] else {
        panic!("expected tool");
    };
    assert_eq!(tool.purity, Some(Purity::Effectful));
    assert_eq!(tool.capabilities[0].name, "network");
    assert_eq!(tool.outputs[0].name, "temperature");
    let Decl::Ai(ai) = &program.declarations[1] else {
        panic!("expected ai");
    };
    assert_eq!(ai.tools[0].name, "get weather");
    let Decl::Policy(policy) = &program.declarations[4] else {
        panic!("expected policy");
    };
    assert_eq!(policy.flows[0].name, "fetch");
    assert_eq!(policy.grants[0].name, "network");
    let Decl::Prompt(prompt) = &program.declarations[6] else {
        panic!("expected prompt");
    };
    assert_eq!(prompt.text, "Summarize\nthe text.");
}

#[test]
fn test_page_and_route() {
    let source = r#"
page "home":
  title is "Home"
  table is "Order"
  button "Buy":
    calls flow "checkout"
route "list orders":
  path is "/api/orders"
  method is "get"
  response:
    orders is json
  flow is "list_orders"
"#;
    let program = parse_ok(source);
    let Decl::Page(page) = &program.declarations[0] else {
        panic!("expected page");
    };
    assert!(matches!(&page.items[2], PageItem::Button { flow, .. } if flow.name == "checkout"));
    let Decl::Route(route) = &program.declarations[1] else {
        panic!("expected route");
    };
    assert_eq!(route.method, "GET");
    assert_eq!(route.response[0].name, "orders");
}

#[test]
fn test_route_requires_flow() {
    let source = "route \"r\":\n  path is \"/x\"\n  response:\n    ok is boolean\n";
    assert!(error_message(&parse_err(source)).contains("missing flow"));
}

#[test]
fn test_unknown_property() {
    let err = parse_err("tool \"t\":\n  colour is \"red\"\n");
    assert!(error_message(&err).contains("Unknown tool property 'colour'"));
    assert_eq!(err.position(), (2, 3));
}

#[test]
fn test_statement_at_top_level_is_rejected() {
    let err = parse_err("return 1\n");
    assert!(error_message(&err).starts_with("Expected a declaration"));
}
