//! Rule: Parallel Tasks
//!
//! `run` tasks only compute values for their own scope. Anything that would
//! change shared state or stop the flow is rejected.
//!
//! # Valid
//!
//! ```text
//! parallel:
//!   run "weather":
//!     let forecast is get weather:
//!       city is input.city
//! ```
//!
//! # Invalid
//!
//! ```text
//! parallel:
//!   run "a":
//!     set state.count is 1
//!     return 1
//!     parallel:
//!       run "inner":
//!         tick
//! ```

use crate::lowering::ir::{walk_stmts, Program, Stmt, TargetRoot};
use crate::lowering::LoweringError;

use super::LoweringRule;

pub struct ParallelTaskRule;

impl LoweringRule for ParallelTaskRule {
    fn id(&self) -> &'static str {
        "parallel-task"
    }

    fn description(&self) -> &'static str {
        "parallel tasks cannot change shared state or end the flow"
    }

    fn check(&self, program: &Program) -> Vec<LoweringError> {
        let mut errors = Vec::new();
        for flow in program.flows.values() {
            walk_stmts(&flow.body, &mut |stmt| {
                if let Stmt::Parallel { tasks, .. } = stmt {
                    for task in tasks {
                        check_task_body(&task.body, &mut errors);
                    }
                }
            });
        }
        errors
    }
}

fn check_task_body(body: &[Stmt], errors: &mut Vec<LoweringError>) {
    walk_stmts(body, &mut |stmt| {
        let message = match stmt {
            Stmt::Return { .. } | Stmt::Yield { .. } => "Parallel tasks cannot return",
            Stmt::Set { target, .. } | Stmt::SetWith { target, .. }
                if target.root == TargetRoot::State =>
            {
                "Parallel tasks cannot change state"
            }
            Stmt::Save { .. } => "Parallel tasks cannot save records",
            Stmt::Find { .. } => "Parallel tasks cannot find records",
            Stmt::AdvanceTime { .. } => "Parallel tasks cannot advance time",
            Stmt::Enqueue { .. } => "Parallel tasks cannot enqueue jobs",
            Stmt::Parallel { .. } => "Parallel blocks cannot be nested",
            _ => return,
        };
        errors.push(LoweringError::invalid_statement(message, stmt.span()));
    });
}
