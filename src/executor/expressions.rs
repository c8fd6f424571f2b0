//! Expression evaluation
//!
//! Evaluation is async because tool calls and flow calls can appear inside
//! any expression. Operators never coerce: a kind mismatch is a
//! `TypeMismatch` fault at the operator's position.

use futures::future::BoxFuture;
use futures::FutureExt;

use super::context::{ExecutionContext, Frame, MAX_CALL_DEPTH};
use super::fault::{FaultKind, RuntimeFault};
use super::statements;
use super::tools;
use super::check_inputs;
use crate::lowering::ir::{BinaryOp, Expr, FieldInit, FlowKind, Literal, Span, ToolCall, UnaryOp};
use crate::value::{Decimal, Record, Value};

pub type EvalResult = Result<Value, RuntimeFault>;

pub fn eval<'a>(
    ctx: &'a mut ExecutionContext,
    frame: &'a Frame,
    expr: &'a Expr,
) -> BoxFuture<'a, EvalResult> {
    async move {
        match expr {
            Expr::Literal { value, .. } => Ok(literal(value)),

            Expr::List { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(eval(&mut *ctx, frame, item).await?);
                }
                Ok(Value::List(values))
            }

            Expr::Record { fields, .. } => Ok(Value::Record(eval_fields(ctx, frame, fields).await?)),

            Expr::Local { name, span } => lookup(frame, name, *span),

            Expr::Input { .. } => Ok(Value::Record(frame.input.clone())),

            Expr::State { .. } => Ok(Value::Record(ctx.state.clone())),

            Expr::Identity { .. } => Ok(Value::Record(ctx.identity.clone())),

            Expr::Attr {
                object,
                field,
                span,
            } => {
                let base = eval(&mut *ctx, frame, object).await?;
                attribute(&base, field, matches!(object.as_ref(), Expr::Identity { .. }), *span)
            }

            Expr::Index {
                object,
                index,
                span,
            } => {
                let base = eval(&mut *ctx, frame, object).await?;
                let key = eval(&mut *ctx, frame, index).await?;
                index_value(base, &key, *span)
            }

            Expr::Unary { op, operand, span } => {
                let value = eval(&mut *ctx, frame, operand).await?;
                unary(*op, value, *span)
            }

            Expr::Binary {
                op,
                left,
                right,
                span,
            } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let lhs = eval(&mut *ctx, frame, left).await?;
                    let lhs = require_bool(op_name(*op), &lhs, *span)?;
                    // Short-circuit
                    if (*op == BinaryOp::And && !lhs) || (*op == BinaryOp::Or && lhs) {
                        return Ok(Value::Bool(lhs));
                    }
                    let rhs = eval(&mut *ctx, frame, right).await?;
                    Ok(Value::Bool(require_bool(op_name(*op), &rhs, *span)?))
                }
                _ => {
                    let lhs = eval(&mut *ctx, frame, left).await?;
                    let rhs = eval(&mut *ctx, frame, right).await?;
                    binary(*op, &lhs, &rhs, *span)
                }
            },

            Expr::OneOf {
                value,
                options,
                span,
            } => {
                let needle = eval(&mut *ctx, frame, value).await?;
                match eval(&mut *ctx, frame, options).await? {
                    Value::List(items) => Ok(Value::Bool(items.contains(&needle))),
                    other => Err(RuntimeFault::type_mismatch(
                        format!("'is one of' needs a list but got {}", other.type_name()),
                        *span,
                    )),
                }
            }

            Expr::Between {
                value,
                low,
                high,
                strict,
                span,
            } => {
                let subject = eval(&mut *ctx, frame, value).await?;
                let low = eval(&mut *ctx, frame, low).await?;
                let high = eval(&mut *ctx, frame, high).await?;
                let subject = require_number("between", &subject, *span)?;
                let low = require_number("between", &low, *span)?;
                let high = require_number("between", &high, *span)?;
                let inside = if *strict {
                    low < subject && subject < high
                } else {
                    low <= subject && subject <= high
                };
                Ok(Value::Bool(inside))
            }

            Expr::ToolCall(call) => {
                let payload = eval_fields(&mut *ctx, frame, &call.args).await?;
                call_tool(ctx, call, payload).await
            }

            Expr::CallFlow {
                kind,
                flow,
                args,
                outputs,
                span,
            } => {
                let input = eval_fields(&mut *ctx, frame, args).await?;
                call_flow(ctx, *kind, flow, input, outputs, *span).await
            }
        }
    }
    .boxed()
}

pub(crate) async fn eval_fields(
    ctx: &mut ExecutionContext,
    frame: &Frame,
    fields: &[FieldInit],
) -> Result<Record, RuntimeFault> {
    let mut record = Record::new();
    for field in fields {
        let value = eval(&mut *ctx, frame, &field.value).await?;
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

/// Conditions of `if`, `find` and friends must be booleans.
pub(crate) async fn eval_condition(
    ctx: &mut ExecutionContext,
    frame: &Frame,
    expr: &Expr,
) -> Result<bool, RuntimeFault> {
    let value = eval(ctx, frame, expr).await?;
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(RuntimeFault::type_mismatch(
            format!("Condition must be a boolean but got {}", other.type_name()),
            expr.span(),
        )),
    }
}

/* ===================== Calls ===================== */

/// Capability check, then dispatch. A denied call is a `blocked` value.
pub(crate) async fn call_tool(
    ctx: &mut ExecutionContext,
    call: &ToolCall,
    payload: Record,
) -> EvalResult {
    let program = ctx.program.clone();
    let tool = program.tool(&call.tool).ok_or_else(|| {
        RuntimeFault::new(FaultKind::UnknownTool, format!("Unknown tool '{}'", call.tool))
            .at(call.span)
    })?;
    if let Some(blocked) = tools::blocked_outcome(tool, &ctx.grants) {
        tracing::info!(tool = %tool.name, "tool call blocked by missing capability");
        return Ok(blocked);
    }
    tools::invoke(ctx.tools.clone(), tool.clone(), payload, call.span).await
}

/// Run `name` in a fresh frame on the same context.
pub(crate) async fn call_flow(
    ctx: &mut ExecutionContext,
    kind: FlowKind,
    name: &str,
    input: Record,
    outputs: &[String],
    span: Span,
) -> EvalResult {
    let program = ctx.program.clone();
    let flow = program
        .flow(name)
        .filter(|f| f.kind == kind)
        .ok_or_else(|| {
            RuntimeFault::new(
                FaultKind::UnknownFlow,
                format!("Unknown {} '{}'", kind.as_str(), name),
            )
            .at(span)
        })?;
    if ctx.depth >= MAX_CALL_DEPTH {
        return Err(RuntimeFault::new(
            FaultKind::CallDepthExceeded,
            format!("Calls nested deeper than {} frames", MAX_CALL_DEPTH),
        )
        .at(span));
    }
    check_inputs(flow, &input).map_err(|f| f.at(span))?;

    ctx.depth += 1;
    let mut callee = Frame::new(input);
    let result = statements::run_body(&mut *ctx, &mut callee, &flow.body).await;
    ctx.depth -= 1;
    let value = result?;

    if outputs.is_empty() {
        return Ok(value);
    }
    let returned = value.type_name();
    let Value::Record(record) = value else {
        return Err(RuntimeFault::new(
            FaultKind::MissingOutput,
            format!(
                "{} '{}' must return a record with its outputs but returned {}",
                capitalized(kind),
                name,
                returned
            ),
        )
        .at(span));
    };
    let mut shaped = Record::new();
    for output in outputs {
        let value = record.get(output).cloned().ok_or_else(|| {
            RuntimeFault::new(
                FaultKind::MissingOutput,
                format!("{} '{}' did not return output '{}'", capitalized(kind), name, output),
            )
            .at(span)
        })?;
        shaped.insert(output.clone(), value);
    }
    Ok(Value::Record(shaped))
}

fn capitalized(kind: FlowKind) -> &'static str {
    match kind {
        FlowKind::Flow => "Flow",
        FlowKind::Pipeline => "Pipeline",
    }
}

/* ===================== Names ===================== */

fn lookup(frame: &Frame, name: &str, span: Span) -> EvalResult {
    if let Some(value) = frame.get(name) {
        return Ok(value.clone());
    }
    if frame.is_pending(name) {
        return Err(RuntimeFault::new(
            FaultKind::PendingValue,
            format!("'{}' is still pending; await it before use", name),
        )
        .at(span));
    }
    Err(RuntimeFault::new(FaultKind::UnknownName, format!("Unknown variable '{}'", name)).at(span))
}

fn attribute(base: &Value, field: &str, on_identity: bool, span: Span) -> EvalResult {
    match base {
        Value::Record(record) => match record.get(field) {
            Some(value) => Ok(value.clone()),
            None if on_identity => Err(RuntimeFault::new(
                FaultKind::MissingField,
                format!("Identity is missing '{}'", field),
            )
            .at(span)),
            None => Err(RuntimeFault::new(
                FaultKind::MissingField,
                format!("Missing attribute '{}'", field),
            )
            .at(span)),
        },
        other => Err(RuntimeFault::type_mismatch(
            format!("Cannot read '{}' from {}", field, other.type_name()),
            span,
        )),
    }
}

fn index_value(base: Value, key: &Value, span: Span) -> EvalResult {
    match (base, key) {
        (Value::List(items), Value::Number(n)) => {
            let position = n
                .to_i64()
                .filter(|i| *i >= 0 && n.is_integer())
                .map(|i| i as usize)
                .ok_or_else(|| {
                    RuntimeFault::type_mismatch(
                        format!("List index must be a non-negative integer, got {}", n),
                        span,
                    )
                })?;
            let len = items.len();
            items.into_iter().nth(position).ok_or_else(|| {
                RuntimeFault::new(
                    FaultKind::IndexOutOfRange,
                    format!("Index {} is out of range for a list of {}", position, len),
                )
                .at(span)
            })
        }
        (Value::Record(record), Value::Text(name)) => {
            attribute(&Value::Record(record), name, false, span)
        }
        (base, key) => Err(RuntimeFault::type_mismatch(
            format!("Cannot index {} with {}", base.type_name(), key.type_name()),
            span,
        )),
    }
}

/* ===================== Operators ===================== */

pub(crate) fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Text(s) => Value::Text(s.clone()),
    }
}

fn op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::Lt => "<",
        BinaryOp::Gte => ">=",
        BinaryOp::Lte => "<=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
    }
}

fn require_bool(op: &str, value: &Value, span: Span) -> Result<bool, RuntimeFault> {
    value.as_bool().ok_or_else(|| {
        RuntimeFault::type_mismatch(
            format!("Operator '{}' requires a boolean but got {}", op, value.type_name()),
            span,
        )
    })
}

fn require_number(op: &str, value: &Value, span: Span) -> Result<Decimal, RuntimeFault> {
    value.as_number().copied().ok_or_else(|| {
        RuntimeFault::type_mismatch(
            format!("Operator '{}' requires a number but got {}", op, value.type_name()),
            span,
        )
    })
}

fn unary(op: UnaryOp, value: Value, span: Span) -> EvalResult {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!require_bool("not", &value, span)?)),
        UnaryOp::Neg => Ok(Value::Number(require_number("-", &value, span)?.neg())),
    }
}

pub(crate) fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, span: Span) -> EvalResult {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::And | BinaryOp::Or => {
            let name = op_name(op);
            let (a, b) = (require_bool(name, lhs, span)?, require_bool(name, rhs, span)?);
            Ok(Value::Bool(if op == BinaryOp::And { a && b } else { a || b }))
        }
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => {
            let name = op_name(op);
            let (a, b) = (require_number(name, lhs, span)?, require_number(name, rhs, span)?);
            Ok(Value::Bool(match op {
                BinaryOp::Gt => a > b,
                BinaryOp::Lt => a < b,
                BinaryOp::Gte => a >= b,
                _ => a <= b,
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            let name = op_name(op);
            let (a, b) = (require_number(name, lhs, span)?, require_number(name, rhs, span)?);
            arithmetic(op, &a, &b, span).map(Value::Number)
        }
    }
}

fn arithmetic(op: BinaryOp, a: &Decimal, b: &Decimal, span: Span) -> Result<Decimal, RuntimeFault> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b.is_zero() {
        return Err(RuntimeFault::new(FaultKind::DivisionByZero, "Division by zero").at(span));
    }
    if op == BinaryOp::Pow && !b.is_integer() {
        return Err(RuntimeFault::type_mismatch(
            format!("Exponent must be an integer, got {}", b),
            span,
        ));
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod => a.checked_rem(b),
        _ => a.checked_pow(b),
    };
    result.ok_or_else(|| {
        RuntimeFault::new(
            FaultKind::NumericOverflow,
            format!("Result of '{}' is out of range", op_name(op)),
        )
        .at(span)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(text: &str) -> Value {
        Value::Number(Decimal::parse(text).unwrap())
    }

    #[test]
    fn test_decimal_arithmetic_is_exact() {
        let span = Span::new(1, 1);
        let sum = binary(BinaryOp::Add, &num("0.1"), &num("0.2"), span).unwrap();
        assert_eq!(sum, num("0.3"));
        let power = binary(BinaryOp::Pow, &num("2"), &num("10"), span).unwrap();
        assert_eq!(power, Value::int(1024));
    }

    #[test]
    fn test_division_by_zero_faults() {
        let fault = binary(BinaryOp::Div, &Value::int(1), &Value::int(0), Span::new(3, 9)).unwrap_err();
        assert_eq!(fault.kind, FaultKind::DivisionByZero);
        assert_eq!(fault.position(), Some((3, 9)));
    }

    #[test]
    fn test_operators_do_not_coerce() {
        let fault = binary(BinaryOp::Add, &Value::text("1"), &Value::int(1), Span::new(1, 5)).unwrap_err();
        assert_eq!(fault.kind, FaultKind::TypeMismatch);
        assert!(fault.message.contains("'+'"));

        let fault = binary(BinaryOp::Gt, &Value::Null, &Value::int(1), Span::new(1, 5)).unwrap_err();
        assert_eq!(fault.kind, FaultKind::TypeMismatch);
    }

    #[test]
    fn test_equality_is_numeric_and_structural() {
        let span = Span::new(1, 1);
        assert_eq!(binary(BinaryOp::Eq, &num("1.50"), &num("1.5"), span).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(BinaryOp::NotEq, &Value::text("a"), &Value::int(1), span).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_index_and_attribute_faults() {
        let span = Span::new(2, 4);
        let list = Value::List(vec![Value::int(1)]);
        assert_eq!(index_value(list.clone(), &Value::int(0), span).unwrap(), Value::int(1));
        let fault = index_value(list, &Value::int(3), span).unwrap_err();
        assert_eq!(fault.kind, FaultKind::IndexOutOfRange);

        let identity = Value::Record(Record::new());
        let fault = attribute(&identity, "email", true, span).unwrap_err();
        assert_eq!(fault.message, "Identity is missing 'email'");
    }
}
