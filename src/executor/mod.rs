//! # Flow executor
//!
//! A tree-walking interpreter over IR flows.
//!
//! ## Model
//!
//! 1. **One context per run**: [`ExecutionContext`] owns the identity, the
//!    effective grants, persisted state, the logical clock, the job outbox
//!    and the run's store transaction
//! 2. **One frame per flow invocation**: [`Frame`] holds the flow's `input`
//!    record, its locals and its pending async bindings
//! 3. **Sequential by default**: only `parallel:` tasks and async tool calls
//!    run concurrently, and both are joined back deterministically
//! 4. **Lazy transactions**: the first save or state write opens the run's
//!    transaction; it commits when the run returns and rolls back on any
//!    fault, including cancellation
//!
//! A run ends `Returned` (a [`FlowOutcome`]) or `Faulted` (a
//! [`RuntimeFault`]). There is no suspended state.

pub mod context;
pub mod expressions;
pub mod fault;
pub mod parallel;
pub mod statements;
pub mod tools;

#[cfg(test)]
mod tests;

pub use context::{ExecutionContext, Frame, MAX_CALL_DEPTH};
pub use expressions::EvalResult;
pub use fault::{FaultKind, RuntimeFault};
pub use statements::Control;
pub use tools::{ToolError, ToolExecutor, ToolRegistry};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::capabilities::{Capability, CapabilitySet};
use crate::lowering::ir::{Flow, Program};
use crate::store::{StoreHandle, StoreResult};
use crate::value::{Record, Value};

/* ===================== Invocation and outcome ===================== */

/// A request to run one flow.
#[derive(Debug, Clone, Default)]
pub struct FlowInvocation {
    /// Flow to run; `None` selects the program's only flow
    pub flow: Option<String>,
    pub input: Record,
    pub identity: Record,
    pub grants: CapabilitySet,
}

impl FlowInvocation {
    pub fn new(flow: Option<&str>) -> Self {
        Self {
            flow: flow.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: Record) -> Self {
        self.input = input;
        self
    }

    pub fn with_identity(mut self, identity: Record) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_grants(mut self, grants: CapabilitySet) -> Self {
        self.grants = grants;
        self
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.grants.insert(capability);
        self
    }
}

/// Result of a run that returned.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub flow: String,
    pub value: Value,
    /// The flow frame's bindings at the end of the run, in binding order
    pub locals: Record,
    pub clock: u64,
    /// Jobs enqueued by the run, in order
    pub jobs: Vec<String>,
}

impl FlowOutcome {
    /// Compact JSON that keeps record field order. Equal runs render
    /// byte-identical output.
    pub fn to_canonical_json(&self) -> String {
        let jobs = Value::List(self.jobs.iter().cloned().map(Value::Text).collect());
        format!(
            "{{\"flow\":{},\"value\":{},\"locals\":{},\"clock\":{},\"jobs\":{}}}",
            Value::text(self.flow.clone()).to_canonical_json(),
            self.value.to_canonical_json(),
            Value::Record(self.locals.clone()).to_canonical_json(),
            self.clock,
            jobs.to_canonical_json()
        )
    }
}

/* ===================== Flow selection ===================== */

/// Pick the flow to run. Without a target the program must have exactly one.
pub fn select_flow<'p>(program: &'p Program, target: Option<&str>) -> Result<&'p Flow, RuntimeFault> {
    let names = || {
        program
            .flows
            .keys()
            .cloned()
            .collect::<Vec<_>>()
    };
    match target {
        Some(name) => program.flow(name).ok_or_else(|| {
            RuntimeFault::new(FaultKind::UnknownFlow, format!("Unknown flow '{}'", name))
                .detail("flows", names())
        }),
        None => {
            let mut flows = program.flows.values();
            match (flows.next(), flows.next()) {
                (Some(flow), None) => Ok(flow),
                (None, _) => Err(RuntimeFault::new(FaultKind::NoFlows, "No flows found")),
                (Some(_), Some(_)) => Err(RuntimeFault::new(
                    FaultKind::MultipleFlows,
                    format!("Multiple flows found: {}; name the flow to run", names().join(", ")),
                )
                .detail("flows", names())),
            }
        }
    }
}

/// Check `input` against the flow's declared inputs. A flow without
/// declared inputs accepts any input record.
pub(crate) fn check_inputs(flow: &Flow, input: &Record) -> Result<(), RuntimeFault> {
    if flow.inputs.is_empty() {
        return Ok(());
    }
    if let Some(extra) = input.keys().find(|k| !flow.inputs.iter().any(|p| p.name == *k)) {
        return Err(RuntimeFault::new(
            FaultKind::InvalidInput,
            format!("Flow '{}' has no input '{}'", flow.name, extra),
        ));
    }
    for param in &flow.inputs {
        let Some(value) = input.get(&param.name) else {
            return Err(RuntimeFault::new(
                FaultKind::InvalidInput,
                format!("Flow '{}' requires input '{}'", flow.name, param.name),
            ));
        };
        if !param.field_type.accepts(value) {
            return Err(RuntimeFault::new(
                FaultKind::InvalidInput,
                format!(
                    "Input '{}' of flow '{}' expects {} but got {}",
                    param.name,
                    flow.name,
                    param.field_type,
                    value.type_name()
                ),
            ));
        }
    }
    Ok(())
}

/* ===================== Execution ===================== */

/// Run `flow` with `arguments` as its `input` record on `ctx`.
///
/// The caller owns the context's transaction: follow with
/// [`ExecutionContext::finish`] on success or [`ExecutionContext::abort`]
/// on a fault. [`Executor::run`] does both.
pub async fn execute(
    flow: &Flow,
    arguments: Record,
    ctx: &mut ExecutionContext,
) -> Result<Value, RuntimeFault> {
    let mut frame = Frame::new(arguments);
    execute_in(flow, &mut frame, ctx).await
}

async fn execute_in(
    flow: &Flow,
    frame: &mut Frame,
    ctx: &mut ExecutionContext,
) -> Result<Value, RuntimeFault> {
    check_inputs(flow, &frame.input).map_err(|f| f.or_at(flow.span))?;
    statements::run_body(ctx, frame, &flow.body).await
}

/// Runs flows of one program against a shared store.
#[derive(Clone)]
pub struct Executor {
    program: Arc<Program>,
    store: StoreHandle,
    tools: Arc<dyn ToolExecutor>,
}

impl Executor {
    pub fn new(program: Arc<Program>, store: StoreHandle, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            program,
            store,
            tools,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Prepare storage for every record the program declares.
    pub async fn register_schemas(&self) -> StoreResult<()> {
        for schema in self.program.records.values() {
            self.store.store().register_schema(schema).await?;
        }
        Ok(())
    }

    pub async fn run(&self, invocation: FlowInvocation) -> Result<FlowOutcome, RuntimeFault> {
        self.run_with_cancel(invocation, CancellationToken::new()).await
    }

    /// Run a flow until it returns, faults or `cancel` fires. Any open
    /// transaction is rolled back before a fault is reported.
    pub async fn run_with_cancel(
        &self,
        invocation: FlowInvocation,
        cancel: CancellationToken,
    ) -> Result<FlowOutcome, RuntimeFault> {
        let program = self.program.clone();
        let flow = select_flow(&program, invocation.flow.as_deref())?;
        let policy: CapabilitySet = program.policy_grants(&flow.name).into_iter().collect();
        let grants = invocation.grants.union(&policy);
        let state = self
            .store
            .store()
            .load_state()
            .await
            .map_err(|e| RuntimeFault::store(e, None))?;

        let mut ctx = ExecutionContext::new(program.clone(), self.store.clone(), self.tools.clone())
            .with_identity(invocation.identity)
            .with_grants(grants)
            .with_state(state)
            .with_cancel(cancel);
        let run_span = info_span!("flow_run", run_id = %ctx.run_id(), flow = %flow.name);

        async move {
            info!("flow run started");
            let mut frame = Frame::new(invocation.input);
            let result = match execute_in(flow, &mut frame, &mut ctx).await {
                Ok(value) => ctx.finish().await.map(|()| value),
                Err(fault) => Err(fault),
            };
            match result {
                Ok(value) => {
                    info!(clock = ctx.clock(), jobs = ctx.jobs().len(), "flow run returned");
                    Ok(FlowOutcome {
                        flow: flow.name.clone(),
                        value,
                        locals: frame.locals().clone(),
                        clock: ctx.clock(),
                        jobs: ctx.jobs().to_vec(),
                    })
                }
                Err(fault) => {
                    ctx.abort().await;
                    warn!(error_id = %fault.error_id(), error = %fault, "flow run faulted");
                    Err(fault)
                }
            }
        }
        .instrument(run_span)
        .await
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("flows", &self.program.flows.keys().collect::<Vec<_>>())
            .field("store", &self.store)
            .finish()
    }
}
