use crate::parser::ast::*;
use crate::parser::{parse_source, ParseError};

pub fn parse_ok(source: &str) -> Program {
    parse_source(source).expect("parse failed")
}

pub fn parse_err(source: &str) -> ParseError {
    parse_source(source).expect_err("parse should fail")
}

/// Body of the only flow in `source`.
pub fn flow_body(source: &str) -> Vec<Stmt> {
    let program = parse_ok(source);
    let flow = program.flows().next().expect("no flow in program");
    flow.body.clone()
}

/// Expression on the right of `let x is …` inside a one-line flow.
pub fn expr(text: &str) -> Expr {
    let source = format!("flow \"f\":\n  let x is {}\n", text);
    match flow_body(&source).into_iter().next() {
        Some(Stmt::Let { value, .. }) => value,
        other => panic!("expected let, got {:?}", other),
    }
}

pub fn error_message(err: &ParseError) -> String {
    err.diagnostic().message
}
