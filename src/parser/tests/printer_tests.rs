//! Canonical printing: parse/print round trips and idempotence

use super::helpers::parse_ok;
use crate::parser::print_program;

const PROGRAM: &str = r#"
spec is "1.0"
use "inventory" as inv
alias "Money" is number
record "Order":
  sku text must be present
  total Money must be at least 0
  order by total
tool "get weather":
  purity is "effectful"
  capability is "network"
  input:
    city is text
  output:
    temperature is number
flow "checkout":
  input:
    amount is number
  let `text` is "escaped"
  let total is input.amount * 2 + 1
  let weather is get weather:
    city is "Oslo"
  if total is strictly between 1 and 100:
    save "Order" with {sku: "A", total: total} as saved
  else if not (total > 100):
    advance time by 2
  else:
    tick
  match total:
    when 3:
      set state.last is total
    otherwise:
      let:
        a is 1
        b is -a
  parallel:
    run "one":
      let first is 1
  let priced is call flow "price":
    input:
      amount is total
    output:
      total
  return [total, weather, priced]
"#;

#[test]
fn test_print_is_idempotent() {
    let first = print_program(&parse_ok(PROGRAM));
    let second = print_program(&parse_ok(&first));
    assert_eq!(first, second);
}

#[test]
fn test_print_canonical_forms() {
    let printed = print_program(&parse_ok(PROGRAM));
    assert!(printed.starts_with("spec is \"1.0\"\n\nuse \"inventory\" as inv\n"));
    assert!(printed.contains("  let `text` is \"escaped\"\n"));
    assert!(printed.contains("  let total is (input.amount * 2) + 1\n"));
    assert!(printed.contains("  if total is strictly between 1 and 100:\n"));
    assert!(printed.contains("  else if not (total > 100):\n"));
    assert!(printed.contains("    tick 2\n"));
    assert!(printed.contains("    tick 1\n"));
    assert!(printed.contains("  let weather is get weather:\n    city is \"Oslo\"\n"));
    assert!(printed.contains("  total Money must be at least 0\n"));
    assert!(printed.contains("    output:\n      total\n"));
}

#[test]
fn test_print_preserves_ast_modulo_positions() {
    let original = parse_ok(PROGRAM);
    let reparsed = parse_ok(&print_program(&original));
    assert_eq!(original.declarations.len(), reparsed.declarations.len());
    assert_eq!(print_program(&original), print_program(&reparsed));
}

#[test]
fn test_multiline_prompt_text_round_trips() {
    let source = "prompt \"p\":\n  text is \"\"\"a \"quoted\"\nsecond\"\"\"\n";
    let program = parse_ok(source);
    let printed = print_program(&program);
    assert_eq!(printed, "prompt \"p\":\n  text is \"a \\\"quoted\\\"\\nsecond\"\n");
    assert_eq!(parse_ok(&printed).declarations, program.declarations);
}
