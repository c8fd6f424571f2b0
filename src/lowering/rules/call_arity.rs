//! Rule: Call Arity
//!
//! `call flow` / `call pipeline` must pass exactly the callee's declared
//! inputs and may only request declared outputs. Tool calls must match the
//! tool's declared inputs when the tool declares any.
//!
//! # Valid
//!
//! ```text
//! flow "price":
//!   input:
//!     amount is number
//!   output:
//!     total is number
//!   return {total: input.amount}
//!
//! flow "checkout":
//!   let priced is call flow "price":
//!     input:
//!       amount is 10
//!     output:
//!       total
//! ```
//!
//! # Invalid
//!
//! ```text
//!   let priced is call flow "price":
//!     input:
//!       amonut is 10      # no such input, and `amount` is missing
//!     output:
//!       tax               # not a declared output
//! ```

use std::collections::BTreeSet;

use crate::lowering::ir::{walk_expr, walk_stmts, Expr, FieldInit, Param, Program, Span, Stmt};
use crate::lowering::LoweringError;

use super::LoweringRule;

pub struct CallArityRule;

impl LoweringRule for CallArityRule {
    fn id(&self) -> &'static str {
        "call-arity"
    }

    fn description(&self) -> &'static str {
        "calls must match the callee's declared inputs and outputs"
    }

    fn check(&self, program: &Program) -> Vec<LoweringError> {
        let mut errors = Vec::new();
        for flow in program.flows.values() {
            walk_stmts(&flow.body, &mut |stmt| {
                if let Stmt::AsyncLet { call, .. } = stmt {
                    check_tool_args(program, &call.tool, &call.args, call.span, &mut errors);
                }
                for expr in stmt.exprs() {
                    walk_expr(expr, &mut |e| check_expr(program, e, &mut errors));
                }
            });
        }
        errors
    }
}

fn check_expr(program: &Program, expr: &Expr, errors: &mut Vec<LoweringError>) {
    match expr {
        Expr::ToolCall(call) => check_tool_args(program, &call.tool, &call.args, call.span, errors),
        Expr::CallFlow {
            kind,
            flow,
            args,
            outputs,
            span,
        } => {
            let Some(callee) = program.flow(flow) else {
                return;
            };
            let label = format!("{} '{}'", capitalize(kind.as_str()), flow);
            check_args(&label, flow, &callee.inputs, args, *span, errors);
            if callee.outputs.is_empty() {
                return;
            }
            for output in outputs {
                if !callee.outputs.iter().any(|p| &p.name == output) {
                    errors.push(LoweringError::arity(
                        flow,
                        format!("{} has no output '{}'", label, output),
                        *span,
                    ));
                }
            }
        }
        _ => {}
    }
}

fn check_tool_args(
    program: &Program,
    tool: &str,
    args: &[FieldInit],
    span: Span,
    errors: &mut Vec<LoweringError>,
) {
    let Some(declared) = program.tool(tool) else {
        return;
    };
    if declared.inputs.is_empty() {
        return;
    }
    check_args(&format!("Tool '{}'", tool), tool, &declared.inputs, args, span, errors);
}

fn check_args(
    label: &str,
    target: &str,
    inputs: &[Param],
    args: &[FieldInit],
    span: Span,
    errors: &mut Vec<LoweringError>,
) {
    let declared: BTreeSet<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
    let given: BTreeSet<&str> = args.iter().map(|a| a.name.as_str()).collect();
    for arg in args {
        if !declared.contains(arg.name.as_str()) {
            errors.push(LoweringError::arity(
                target,
                format!("{} has no input '{}'", label, arg.name),
                arg.span,
            ));
        }
    }
    for input in inputs {
        if !given.contains(input.name.as_str()) {
            errors.push(LoweringError::arity(
                target,
                format!("{} requires input '{}'", label, input.name),
                span,
            ));
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
