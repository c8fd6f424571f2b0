//! Rule: Purity
//!
//! A flow declared `purity is "pure"` must never reach a side effect.
//!
//! # Valid
//!
//! ```text
//! flow "double":
//!   purity is "pure"
//!   return input.amount * 2
//! ```
//!
//! # Invalid
//!
//! ```text
//! flow "remember":
//!   purity is "pure"
//!   save "Order" with {sku: "A"}       # persistence
//!   set state.last is 1                # state write
//!   let w is get weather:              # tool that needs a capability
//!     city is "Oslo"
//!   enqueue job "nightly"              # job outbox
//!   let r is call flow "impure thing": # effectful callee
//!     ...
//! ```

use crate::lowering::ir::{
    walk_expr, walk_stmts, Expr, Flow, Program, Purity, Span, Stmt, TargetRoot,
};
use crate::lowering::LoweringError;

use super::LoweringRule;

pub struct PurityRule;

impl LoweringRule for PurityRule {
    fn id(&self) -> &'static str {
        "purity"
    }

    fn description(&self) -> &'static str {
        "pure flows cannot save, write state, enqueue jobs or call effectful tools and flows"
    }

    fn check(&self, program: &Program) -> Vec<LoweringError> {
        let mut errors = Vec::new();
        for flow in program.flows.values().filter(|f| f.is_pure()) {
            check_flow(program, flow, &mut errors);
        }
        errors
    }
}

fn check_flow(program: &Program, flow: &Flow, errors: &mut Vec<LoweringError>) {
    let name = flow.name.as_str();
    walk_stmts(&flow.body, &mut |stmt| {
        match stmt {
            Stmt::Save { span, .. } => errors.push(LoweringError::impure(
                name,
                format!("Pure flow '{}' cannot save records", name),
                *span,
            )),
            Stmt::Set { target, span, .. } | Stmt::SetWith { target, span, .. }
                if target.root == TargetRoot::State =>
            {
                errors.push(LoweringError::impure(
                    name,
                    format!("Pure flow '{}' cannot change state", name),
                    *span,
                ))
            }
            Stmt::Enqueue { span, .. } => errors.push(LoweringError::impure(
                name,
                format!("Pure flow '{}' cannot enqueue jobs", name),
                *span,
            )),
            Stmt::AsyncLet { call, .. } => check_tool(program, name, &call.tool, call.span, errors),
            _ => {}
        }
        for expr in stmt.exprs() {
            walk_expr(expr, &mut |e| match e {
                Expr::ToolCall(call) => check_tool(program, name, &call.tool, call.span, errors),
                Expr::CallFlow {
                    flow: callee, span, ..
                } => {
                    let pure = program
                        .flow(callee)
                        .map(|f| f.purity == Purity::Pure)
                        .unwrap_or(false);
                    if !pure {
                        errors.push(LoweringError::impure(
                            name,
                            format!("Pure flow '{}' cannot call effectful flow '{}'", name, callee),
                            *span,
                        ));
                    }
                }
                _ => {}
            });
        }
    });
}

fn check_tool(
    program: &Program,
    flow: &str,
    tool: &str,
    span: Span,
    errors: &mut Vec<LoweringError>,
) {
    let effectful = program
        .tool(tool)
        .map(|t| t.purity == Purity::Effectful || !t.capabilities.is_empty())
        .unwrap_or(true);
    if effectful {
        errors.push(LoweringError::impure(
            flow,
            format!("Pure flow '{}' cannot call effectful tool '{}'", flow, tool),
            span,
        ));
    }
}
