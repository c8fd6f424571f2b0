//! Tests for expression precedence and comparison phrases

use super::helpers::{error_message, expr, parse_err};
use crate::parser::ast::*;
use crate::parser::printer::print_expr;
use crate::value::Decimal;

fn op_of(e: &Expr) -> BinaryOp {
    match e {
        Expr::Binary { op, .. } => *op,
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn test_multiplication_binds_tighter_than_addition() {
    assert_eq!(print_expr(&expr("1 + 2 * 3")), "1 + (2 * 3)");
    assert_eq!(print_expr(&expr("(1 + 2) * 3")), "(1 + 2) * 3");
}

#[test]
fn test_exponent_is_right_associative() {
    assert_eq!(print_expr(&expr("2 ** 3 ** 2")), "2 ** (3 ** 2)");
}

#[test]
fn test_unary_minus_binds_tighter_than_exponent() {
    let e = expr("-2 ** 2");
    assert_eq!(op_of(&e), BinaryOp::Pow);
    assert_eq!(print_expr(&e), "(-2) ** 2");
}

#[test]
fn test_logical_precedence() {
    let e = expr("a or b and not c");
    assert_eq!(op_of(&e), BinaryOp::Or);
    assert_eq!(print_expr(&e), "a or (b and (not c))");
}

#[test]
fn test_english_comparisons() {
    let cases = [
        ("a is equal to b", BinaryOp::Eq),
        ("a is b", BinaryOp::Eq),
        ("a is not b", BinaryOp::NotEq),
        ("a is not equal to b", BinaryOp::NotEq),
        ("a is greater than b", BinaryOp::Gt),
        ("a is less than b", BinaryOp::Lt),
        ("a is at least b", BinaryOp::Gte),
        ("a is at most b", BinaryOp::Lte),
        ("a >= b", BinaryOp::Gte),
        ("a != b", BinaryOp::NotEq),
    ];
    for (text, op) in cases {
        assert_eq!(op_of(&expr(text)), op, "for {}", text);
    }
}

#[test]
fn test_comparison_operands_are_additive() {
    let e = expr("a + 1 is greater than b * 2");
    match e {
        Expr::Binary { op, left, right, .. } => {
            assert_eq!(op, BinaryOp::Gt);
            assert_eq!(op_of(&left), BinaryOp::Add);
            assert_eq!(op_of(&right), BinaryOp::Mul);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_between_is_ternary() {
    match expr("score is strictly between 1 and limit + 1") {
        Expr::Between {
            value,
            low,
            high,
            strict,
            ..
        } => {
            assert!(strict);
            assert!(matches!(*value, Expr::Name { ref name, .. } if name == "score"));
            assert!(matches!(*low, Expr::Literal { .. }));
            assert_eq!(op_of(&high), BinaryOp::Add);
        }
        other => panic!("unexpected {:?}", other),
    }

    match expr("x is between 1 and 5 and ok") {
        Expr::Binary { op, left, .. } => {
            assert_eq!(op, BinaryOp::And);
            assert!(matches!(*left, Expr::Between { strict: false, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_one_of() {
    let e = expr("status is one of [\"open\", \"held\"]");
    assert!(matches!(e, Expr::OneOf { .. }));
    assert_eq!(print_expr(&e), "status is one of [\"open\", \"held\"]");
}

#[test]
fn test_postfix_access() {
    let e = expr("input.items[0].name");
    assert_eq!(print_expr(&e), "input.items[0].name");
    match e {
        Expr::Attr { object, field, .. } => {
            assert_eq!(field, "name");
            assert!(matches!(*object, Expr::Index { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_literals() {
    assert!(matches!(
        expr("null"),
        Expr::Literal {
            value: Literal::Null,
            ..
        }
    ));
    match expr("12.50") {
        Expr::Literal {
            value: Literal::Number(n),
            ..
        } => assert_eq!(n, Decimal::parse("12.5").unwrap()),
        other => panic!("unexpected {:?}", other),
    }
    let record = expr("{name: \"a\", \"full name\": [1, 2], text: true}");
    match record {
        Expr::Record { fields, .. } => {
            let keys: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(keys, vec!["name", "full name", "text"]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_duplicate_record_key() {
    let err = parse_err("flow \"f\":\n  let x is {a: 1, a: 2}\n");
    assert_eq!(err.error_id(), "parse.duplicate");
}

#[test]
fn test_strictly_requires_between() {
    let err = parse_err("flow \"f\":\n  let x is a is strictly 3\n");
    assert!(error_message(&err).contains("Expected 'between'"));
}

#[test]
fn test_expression_positions() {
    let e = expr("a + b");
    assert_eq!(e.span(), Span::new(2, 14));
    match e {
        Expr::Binary { left, right, .. } => {
            assert_eq!(left.span(), Span::new(2, 12));
            assert_eq!(right.span(), Span::new(2, 16));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_context_keywords_and_backticked_names_differ() {
    assert!(matches!(expr("state"), Expr::Root { root: ContextRoot::State, .. }));
    assert!(matches!(expr("identity.role"), Expr::Attr { ref object, .. }
        if matches!(**object, Expr::Root { root: ContextRoot::Identity, .. })));
    assert!(matches!(expr("`state`"), Expr::Name { ref name, .. } if name == "state"));

    assert_eq!(print_expr(&expr("`input` + input.amount")), "`input` + input.amount");
}
