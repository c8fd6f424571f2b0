//! `parallel:` blocks
//!
//! Every task runs on a fork of the context with a copy of the parent's
//! bindings, so tasks never observe each other. Once all of them finish,
//! what each task bound is merged into the parent in declaration order. Two
//! tasks binding the same name is a conflict and fails the run.

use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::debug;

use super::context::{ExecutionContext, Frame};
use super::fault::{FaultKind, RuntimeFault};
use super::statements::{exec_block, Control};
use crate::lowering::ir::{Span, Task};
use crate::value::Value;

pub(crate) async fn run_tasks(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    tasks: &[Task],
    span: Span,
) -> Result<(), RuntimeFault> {
    let runs = tasks.iter().map(|task| {
        let mut fork = ctx.fork();
        let mut scope = Frame::task_scope(frame);
        async move {
            let result = match fork.check_cancelled(task.span) {
                Ok(()) => exec_block(&mut fork, &mut scope, &task.body).await,
                Err(fault) => Err(fault),
            };
            (scope, result)
        }
    });
    let finished = join_all(runs).await;
    debug!(tasks = tasks.len(), "parallel block finished");

    // The first failure in declaration order wins
    let mut scopes = Vec::with_capacity(finished.len());
    for (task, (scope, result)) in tasks.iter().zip(finished) {
        if let Control::Return(_) = result? {
            return Err(RuntimeFault::new(
                FaultKind::ParallelEffect,
                "Parallel tasks cannot return",
            )
            .at(task.span));
        }
        scopes.push((task, scope));
    }

    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for (task, scope) in &scopes {
        let bound = scope
            .written()
            .iter()
            .map(String::as_str)
            .chain(scope.pending_names());
        for name in bound {
            if let Some(first) = owners.get(name) {
                if *first != task.name {
                    return Err(RuntimeFault::new(
                        FaultKind::ParallelConflict,
                        format!(
                            "Tasks \"{}\" and \"{}\" both bind '{}'",
                            first, task.name, name
                        ),
                    )
                    .at(span)
                    .detail("name", name)
                    .detail("tasks", vec![first.to_string(), task.name.clone()]));
                }
            }
            owners.insert(name.to_string(), task.name.as_str());
        }
    }

    for (_, mut scope) in scopes {
        for name in scope.written().to_vec() {
            let value = scope.get(&name).cloned().unwrap_or(Value::Null);
            frame.bind(name, value);
        }
        frame.adopt_pending(&mut scope);
    }
    Ok(())
}
