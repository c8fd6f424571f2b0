//! Statement execution

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::{ExecutionContext, Frame};
use super::expressions::{eval, eval_condition, eval_fields, EvalResult};
use super::fault::{FaultKind, RuntimeFault};
use super::parallel;
use super::tools;
use crate::lowering::ir::{MatchArm, Span, Stmt, Target, TargetRoot, ToolCall};
use crate::value::{Record, Value};

/* ===================== Control Flow ===================== */

/// What a statement asks of the block around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    /// `return` or `yield`: the first one wins and nothing after it runs
    Return(Value),
}

pub type ExecResult = Result<Control, RuntimeFault>;

/// Run a flow body. A body that falls off its end returns null.
pub(crate) async fn run_body(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    body: &[Stmt],
) -> EvalResult {
    match exec_block(ctx, frame, body).await? {
        Control::Return(value) => Ok(value),
        Control::None => Ok(Value::Null),
    }
}

pub fn exec_block<'a>(
    ctx: &'a mut ExecutionContext,
    frame: &'a mut Frame,
    stmts: &'a [Stmt],
) -> BoxFuture<'a, ExecResult> {
    async move {
        for stmt in stmts {
            ctx.check_cancelled(stmt.span())?;
            match exec_stmt(&mut *ctx, &mut *frame, stmt).await? {
                Control::None => {}
                control => return Ok(control),
            }
        }
        Ok(Control::None)
    }
    .boxed()
}

async fn exec_stmt(ctx: &mut ExecutionContext, frame: &mut Frame, stmt: &Stmt) -> ExecResult {
    match stmt {
        Stmt::Let { name, value, .. } => {
            let value = eval(&mut *ctx, frame, value).await?;
            frame.bind(name.clone(), value);
        }

        Stmt::AsyncLet { name, call, span } => issue_async(ctx, frame, name, call, *span).await?,

        Stmt::Set {
            target,
            value,
            span,
        } => {
            let value = eval(&mut *ctx, frame, value).await?;
            assign(ctx, frame, target, value, *span).await?;
        }

        Stmt::SetWith {
            target,
            fields,
            span,
        } => {
            let fields = eval_fields(&mut *ctx, frame, fields).await?;
            assign_fields(ctx, frame, target, fields, *span).await?;
        }

        Stmt::If {
            condition,
            then_body,
            else_body,
            ..
        } => {
            let body = if eval_condition(&mut *ctx, frame, condition).await? {
                then_body
            } else {
                else_body
            };
            return exec_block(ctx, frame, body).await;
        }

        Stmt::Repeat { count, body, span } => {
            let bound = eval(&mut *ctx, frame, count).await?;
            let times = repeat_count(&bound, *span)?;
            for _ in 0..times {
                ctx.check_cancelled(*span)?;
                if let Control::Return(value) = exec_block(&mut *ctx, &mut *frame, body).await? {
                    return Ok(Control::Return(value));
                }
            }
        }

        Stmt::ForEach {
            item,
            iterable,
            body,
            span,
        } => {
            let items = match eval(&mut *ctx, frame, iterable).await? {
                Value::List(items) => items,
                other => {
                    return Err(RuntimeFault::type_mismatch(
                        format!("'for each' needs a list but got {}", other.type_name()),
                        *span,
                    ))
                }
            };
            for element in items {
                ctx.check_cancelled(*span)?;
                frame.bind(item.clone(), element);
                if let Control::Return(value) = exec_block(&mut *ctx, &mut *frame, body).await? {
                    return Ok(Control::Return(value));
                }
            }
        }

        Stmt::Match {
            subject,
            arms,
            otherwise,
            span,
        } => {
            let subject = eval(&mut *ctx, frame, subject).await?;
            let body = match matching_arm(ctx, frame, arms, &subject).await? {
                Some(arm) => &arm.body,
                None => match otherwise {
                    Some(body) => body,
                    None => {
                        return Err(RuntimeFault::new(
                            FaultKind::NoMatchingArm,
                            format!("No case matched {}", subject.to_canonical_json()),
                        )
                        .at(*span)
                        .detail("value", subject.to_json()))
                    }
                },
            };
            return exec_block(ctx, frame, body).await;
        }

        Stmt::Parallel { tasks, span } => parallel::run_tasks(ctx, frame, tasks, *span).await?,

        Stmt::Await { name, span } => await_binding(ctx, frame, name, *span).await?,

        Stmt::Return { value, .. } | Stmt::Yield { value, .. } => {
            let value = eval(&mut *ctx, frame, value).await?;
            return Ok(Control::Return(value));
        }

        Stmt::AdvanceTime { amount, span } => {
            let amount = eval(&mut *ctx, frame, amount).await?;
            advance_clock(ctx, &amount, *span)?;
        }

        Stmt::Save {
            record,
            value,
            binding,
            span,
        } => {
            let value = eval(&mut *ctx, frame, value).await?;
            let saved = save(ctx, record, value, *span).await?;
            if let Some(binding) = binding {
                frame.bind(binding.clone(), Value::Record(saved));
            }
        }

        Stmt::Find {
            record,
            predicate,
            binding,
            span,
        } => {
            let program = ctx.program.clone();
            let schema = program.record(record).ok_or_else(|| unknown_record(record, *span))?;
            let rows = ctx
                .reader(*span)?
                .list(schema)
                .await
                .map_err(|e| RuntimeFault::store(e, Some(*span)))?;
            let mut matched = Vec::new();
            for row in rows {
                let scope = Frame::row_scope(frame, &row);
                if eval_condition(&mut *ctx, &scope, predicate).await? {
                    matched.push(Value::Record(row));
                }
            }
            debug!(record = %record, rows = matched.len(), "find");
            frame.bind(binding.clone(), Value::List(matched));
        }

        Stmt::Enqueue { job, span } => {
            if ctx.in_parallel {
                return Err(RuntimeFault::new(
                    FaultKind::ParallelEffect,
                    "Parallel tasks cannot enqueue jobs",
                )
                .at(*span));
            }
            debug!(job = %job, "job enqueued");
            ctx.jobs.push(job.clone());
        }
    }
    Ok(Control::None)
}

async fn matching_arm<'s>(
    ctx: &mut ExecutionContext,
    frame: &Frame,
    arms: &'s [MatchArm],
    subject: &Value,
) -> Result<Option<&'s MatchArm>, RuntimeFault> {
    for arm in arms {
        if eval(&mut *ctx, frame, &arm.pattern).await? == *subject {
            return Ok(Some(arm));
        }
    }
    Ok(None)
}

fn repeat_count(bound: &Value, span: Span) -> Result<u64, RuntimeFault> {
    let invalid = || {
        RuntimeFault::new(
            FaultKind::InvalidRepeatBound,
            format!(
                "Repeat count must be a non-negative integer but got {}",
                bound.to_canonical_json()
            ),
        )
        .at(span)
    };
    match bound {
        Value::Number(n) if n.is_integer() && !n.is_negative() => {
            n.to_i64().map(|n| n as u64).ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

fn advance_clock(ctx: &mut ExecutionContext, amount: &Value, span: Span) -> Result<(), RuntimeFault> {
    if ctx.in_parallel {
        return Err(
            RuntimeFault::new(FaultKind::ParallelEffect, "Parallel tasks cannot advance time").at(span),
        );
    }
    let invalid = || {
        RuntimeFault::new(
            FaultKind::InvalidTimeAmount,
            format!(
                "Time advances by a non-negative integer but got {}",
                amount.to_canonical_json()
            ),
        )
        .at(span)
    };
    let ticks = match amount {
        Value::Number(n) if n.is_integer() && !n.is_negative() => {
            n.to_i64().map(|n| n as u64).ok_or_else(invalid)?
        }
        _ => return Err(invalid()),
    };
    ctx.clock = ctx.clock.checked_add(ticks).ok_or_else(|| {
        RuntimeFault::new(FaultKind::NumericOverflow, "Logical clock overflowed").at(span)
    })?;
    Ok(())
}

/* ===================== Async bindings ===================== */

async fn issue_async(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    name: &str,
    call: &ToolCall,
    span: Span,
) -> Result<(), RuntimeFault> {
    let payload = eval_fields(&mut *ctx, frame, &call.args).await?;
    let program = ctx.program.clone();
    let tool = program.tool(&call.tool).ok_or_else(|| {
        RuntimeFault::new(FaultKind::UnknownTool, format!("Unknown tool '{}'", call.tool)).at(span)
    })?;
    match tools::blocked_outcome(tool, &ctx.grants) {
        Some(blocked) => frame.add_settled(name.to_string(), blocked),
        None => {
            let handle = tokio::spawn(tools::invoke(
                ctx.tools.clone(),
                tool.clone(),
                payload,
                call.span,
            ));
            debug!(binding = %name, tool = %tool.name, "async tool call issued");
            frame.add_pending(name.to_string(), handle);
        }
    }
    Ok(())
}

async fn await_binding(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    name: &str,
    span: Span,
) -> Result<(), RuntimeFault> {
    let Some(mut handle) = frame.take_pending(name) else {
        if frame.is_settled(name) {
            return Ok(());
        }
        if frame.is_outer_pending(name) {
            return Err(RuntimeFault::new(
                FaultKind::PendingValue,
                format!(
                    "'{}' is pending outside this parallel task; await it before the parallel block",
                    name
                ),
            )
            .at(span));
        }
        return Err(RuntimeFault::new(
            FaultKind::UnknownAwaitTarget,
            format!("Nothing to await for '{}'", name),
        )
        .at(span));
    };
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = ctx.cancel.cancelled() => {
            handle.abort();
            return Err(RuntimeFault::cancelled().at(span));
        }
    };
    let value = joined
        .map_err(|e| {
            RuntimeFault::new(
                FaultKind::ToolFailed,
                format!("Async call '{}' did not complete: {}", name, e),
            )
            .at(span)
        })?
        .map_err(|fault| fault.or_at(span))?;
    frame.mark_settled(name);
    frame.bind(name.to_string(), value);
    Ok(())
}

/* ===================== Records ===================== */

fn unknown_record(name: &str, span: Span) -> RuntimeFault {
    RuntimeFault::new(FaultKind::UnknownRecord, format!("Unknown record '{}'", name)).at(span)
}

async fn save(
    ctx: &mut ExecutionContext,
    record: &str,
    value: Value,
    span: Span,
) -> Result<Record, RuntimeFault> {
    let returned = value.type_name();
    let Value::Record(fields) = value else {
        return Err(RuntimeFault::type_mismatch(
            format!("Saving '{}' needs a record but got {}", record, returned),
            span,
        ));
    };
    let program = ctx.program.clone();
    let schema = program.record(record).ok_or_else(|| unknown_record(record, span))?;
    let store = ctx.writer("save records", span).await?;
    let saved = store
        .save(schema, &fields)
        .await
        .map_err(|e| RuntimeFault::store(e, Some(span)))?;
    debug!(record = %record, id = ?saved.get("id"), "record saved");
    Ok(saved)
}

/* ===================== Assignment ===================== */

async fn assign(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    target: &Target,
    value: Value,
    span: Span,
) -> Result<(), RuntimeFault> {
    match target.root {
        TargetRoot::Local => {
            let (name, rest) = local_target(target)?;
            if rest.is_empty() {
                frame.bind(name.to_string(), value);
                return Ok(());
            }
            let mut root = local_record(frame, name, target.span)?;
            *slot_at(&mut root, rest, target.span)? = value;
            frame.bind(name.to_string(), Value::Record(root));
        }
        TargetRoot::State => {
            let state = ctx.state_mut(span).await?;
            if target.path.is_empty() {
                match value {
                    Value::Record(record) => *state = record,
                    other => {
                        return Err(RuntimeFault::type_mismatch(
                            format!("State must be a record but got {}", other.type_name()),
                            target.span,
                        ))
                    }
                }
            } else {
                *slot_at(state, &target.path, target.span)? = value;
            }
        }
    }
    Ok(())
}

async fn assign_fields(
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    target: &Target,
    fields: Record,
    span: Span,
) -> Result<(), RuntimeFault> {
    match target.root {
        TargetRoot::Local => {
            let (name, rest) = local_target(target)?;
            if rest.is_empty() {
                let mut current = frame.get(name).cloned().unwrap_or(Value::Null);
                merge_into(&mut current, fields, target.span)?;
                frame.bind(name.to_string(), current);
                return Ok(());
            }
            let mut root = local_record(frame, name, target.span)?;
            merge_into(slot_at(&mut root, rest, target.span)?, fields, target.span)?;
            frame.bind(name.to_string(), Value::Record(root));
        }
        TargetRoot::State => {
            let state = ctx.state_mut(span).await?;
            if target.path.is_empty() {
                for (key, value) in fields {
                    state.insert(key, value);
                }
            } else {
                merge_into(slot_at(state, &target.path, target.span)?, fields, target.span)?;
            }
        }
    }
    Ok(())
}

fn local_target(target: &Target) -> Result<(&str, &[String]), RuntimeFault> {
    match target.path.split_first() {
        Some((name, rest)) => Ok((name.as_str(), rest)),
        None => Err(RuntimeFault::new(FaultKind::UnknownName, "Assignment has no target").at(target.span)),
    }
}

/// The record bound to `name`, for a nested assignment into it.
fn local_record(frame: &Frame, name: &str, span: Span) -> Result<Record, RuntimeFault> {
    match frame.get(name) {
        Some(Value::Record(record)) => Ok(record.clone()),
        Some(Value::Null) => Ok(Record::new()),
        Some(other) => Err(RuntimeFault::type_mismatch(
            format!("Cannot set a field on '{}', which is {}", name, other.type_name()),
            span,
        )),
        None => Err(RuntimeFault::new(FaultKind::UnknownName, format!("Unknown variable '{}'", name)).at(span)),
    }
}

/// Walk `path` inside `record`, creating empty records along the way.
fn slot_at<'r>(record: &'r mut Record, path: &[String], span: Span) -> Result<&'r mut Value, RuntimeFault> {
    let Some((first, rest)) = path.split_first() else {
        return Err(RuntimeFault::new(FaultKind::UnknownName, "Assignment has no target").at(span));
    };
    if !record.contains_key(first) {
        record.insert(first.clone(), Value::Null);
    }
    let slot = record.get_mut(first).ok_or_else(|| {
        RuntimeFault::new(FaultKind::MissingField, format!("Missing attribute '{}'", first)).at(span)
    })?;
    if rest.is_empty() {
        return Ok(slot);
    }
    if slot.is_null() {
        *slot = Value::Record(Record::new());
    }
    match slot {
        Value::Record(inner) => slot_at(inner, rest, span),
        other => Err(RuntimeFault::type_mismatch(
            format!("Cannot set '{}' inside {}", rest[0], other.type_name()),
            span,
        )),
    }
}

fn merge_into(slot: &mut Value, fields: Record, span: Span) -> Result<(), RuntimeFault> {
    if slot.is_null() {
        *slot = Value::Record(Record::new());
    }
    match slot {
        Value::Record(record) => {
            for (key, value) in fields {
                record.insert(key, value);
            }
            Ok(())
        }
        other => Err(RuntimeFault::type_mismatch(
            format!("'set … with' needs a record but found {}", other.type_name()),
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_count_rejects_negative_and_fractions() {
        let span = Span::new(2, 3);
        assert_eq!(repeat_count(&Value::int(3), span).unwrap(), 3);
        assert_eq!(repeat_count(&Value::int(0), span).unwrap(), 0);
        for bad in [Value::int(-1), Value::text("3"), Value::Null] {
            let fault = repeat_count(&bad, span).unwrap_err();
            assert_eq!(fault.kind, FaultKind::InvalidRepeatBound);
        }
        let half = Value::Number(crate::value::Decimal::parse("1.5").unwrap());
        assert!(repeat_count(&half, span).is_err());
    }

    #[test]
    fn test_slot_at_creates_intermediate_records() {
        let mut root = Record::new();
        let path = vec!["profile".to_string(), "name".to_string()];
        *slot_at(&mut root, &path, Span::new(1, 1)).unwrap() = Value::text("Ada");
        assert_eq!(
            Value::Record(root.clone()).to_canonical_json(),
            r#"{"profile":{"name":"Ada"}}"#
        );

        root.insert("count", Value::int(1));
        let path = vec!["count".to_string(), "inner".to_string()];
        let fault = slot_at(&mut root, &path, Span::new(1, 1)).unwrap_err();
        assert_eq!(fault.kind, FaultKind::TypeMismatch);
    }
}
