//! Per-run execution context and flow frames

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::fault::{FaultKind, RuntimeFault};
use super::tools::ToolExecutor;
use crate::capabilities::CapabilitySet;
use crate::lowering::ir::{Program, Span};
use crate::store::{Store, StoreHandle, Transaction};
use crate::value::{Record, Value};

/// Nested `call flow` frames allowed before the run faults.
pub const MAX_CALL_DEPTH: usize = 64;

/* ===================== Frames ===================== */

/// Bindings of one flow invocation.
pub struct Frame {
    pub(crate) input: Record,
    pub(crate) locals: Record,
    /// Names bound since the frame was created; tracked for parallel tasks
    written: Option<Vec<String>>,
    pending: BTreeMap<String, JoinHandle<Result<Value, RuntimeFault>>>,
    settled: BTreeSet<String>,
    /// Async bindings still pending in the flow that started this task
    outer_pending: BTreeSet<String>,
}

impl Frame {
    pub fn new(input: Record) -> Self {
        Self::scope(input, Record::new(), None)
    }

    fn scope(input: Record, locals: Record, written: Option<Vec<String>>) -> Self {
        Self {
            input,
            locals,
            written,
            pending: BTreeMap::new(),
            settled: BTreeSet::new(),
            outer_pending: BTreeSet::new(),
        }
    }

    /// A task scope: a copy of the parent's bindings that remembers what
    /// the task itself binds.
    pub(crate) fn task_scope(parent: &Frame) -> Self {
        let mut scope = Self::scope(
            parent.input.clone(),
            parent.locals.clone(),
            Some(Vec::new()),
        );
        scope.outer_pending = parent
            .pending
            .keys()
            .chain(parent.outer_pending.iter())
            .cloned()
            .collect();
        scope
    }

    /// The parent's bindings with `row`'s fields on top, for `find` predicates.
    pub(crate) fn row_scope(parent: &Frame, row: &Record) -> Self {
        let mut locals = parent.locals.clone();
        for (key, value) in row.iter() {
            locals.insert(key, value.clone());
        }
        Self::scope(parent.input.clone(), locals, None)
    }

    pub fn locals(&self) -> &Record {
        &self.locals
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.locals.get_mut(name)
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(written) = &mut self.written {
            if !written.contains(&name) {
                written.push(name.clone());
            }
        }
        self.outer_pending.remove(&name);
        self.locals.insert(name, value);
    }

    /// Names the task bound, in first-bind order.
    pub(crate) fn written(&self) -> &[String] {
        self.written.as_deref().unwrap_or(&[])
    }

    pub(crate) fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name) || self.outer_pending.contains(name)
    }

    /// Pending in the enclosing flow; only that flow can await it.
    pub(crate) fn is_outer_pending(&self, name: &str) -> bool {
        self.outer_pending.contains(name)
    }

    pub(crate) fn add_pending(
        &mut self,
        name: String,
        handle: JoinHandle<Result<Value, RuntimeFault>>,
    ) {
        self.settled.remove(&name);
        self.outer_pending.remove(&name);
        if let Some(previous) = self.pending.insert(name, handle) {
            previous.abort();
        }
    }

    /// An async binding that resolved at issue time (a blocked call).
    pub(crate) fn add_settled(&mut self, name: String, value: Value) {
        if let Some(previous) = self.pending.remove(&name) {
            previous.abort();
        }
        self.settled.insert(name.clone());
        self.bind(name, value);
    }

    pub(crate) fn take_pending(
        &mut self,
        name: &str,
    ) -> Option<JoinHandle<Result<Value, RuntimeFault>>> {
        self.pending.remove(name)
    }

    pub(crate) fn is_settled(&self, name: &str) -> bool {
        self.settled.contains(name)
    }

    pub(crate) fn mark_settled(&mut self, name: &str) {
        self.settled.insert(name.to_string());
    }

    /// Move a finished task's async handles into this frame.
    pub(crate) fn adopt_pending(&mut self, task: &mut Frame) {
        for (name, handle) in std::mem::take(&mut task.pending) {
            self.add_pending(name, handle);
        }
        for name in std::mem::take(&mut task.settled) {
            self.settled.insert(name);
        }
    }

    pub(crate) fn pending_names(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        for (name, handle) in std::mem::take(&mut self.pending) {
            debug!(binding = %name, "aborting unawaited async call");
            handle.abort();
        }
    }
}

/* ===================== Execution context ===================== */

/// Everything a run shares across its frames: the program, the store and
/// the open transaction, the caller's identity and grants, persisted state,
/// the logical clock and the job outbox.
pub struct ExecutionContext {
    pub(crate) run_id: Uuid,
    pub(crate) program: Arc<Program>,
    store: StoreHandle,
    pub(crate) tools: Arc<dyn ToolExecutor>,
    pub(crate) identity: Record,
    pub(crate) grants: CapabilitySet,
    pub(crate) state: Record,
    state_dirty: bool,
    pub(crate) clock: u64,
    pub(crate) jobs: Vec<String>,
    tx: Option<Transaction>,
    pub(crate) cancel: CancellationToken,
    /// Set on the forks that run parallel tasks
    pub(crate) in_parallel: bool,
    pub(crate) depth: usize,
}

impl ExecutionContext {
    pub fn new(program: Arc<Program>, store: StoreHandle, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            program,
            store,
            tools,
            identity: Record::new(),
            grants: CapabilitySet::new(),
            state: Record::new(),
            state_dirty: false,
            clock: 0,
            jobs: Vec::new(),
            tx: None,
            cancel: CancellationToken::new(),
            in_parallel: false,
            depth: 0,
        }
    }

    pub fn with_identity(mut self, identity: Record) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_grants(mut self, grants: CapabilitySet) -> Self {
        self.grants = grants;
        self
    }

    pub fn with_state(mut self, state: Record) -> Self {
        self.state = state;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> &Record {
        &self.state
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// A context for one parallel task. It shares the run's program, tools,
    /// identity and grants, reads a copy of state and never touches the
    /// store.
    pub(crate) fn fork(&self) -> Self {
        Self {
            run_id: self.run_id,
            program: self.program.clone(),
            store: self.store.clone(),
            tools: self.tools.clone(),
            identity: self.identity.clone(),
            grants: self.grants.clone(),
            state: self.state.clone(),
            state_dirty: false,
            clock: self.clock,
            jobs: Vec::new(),
            tx: None,
            cancel: self.cancel.clone(),
            in_parallel: true,
            depth: self.depth,
        }
    }

    pub(crate) fn check_cancelled(&self, span: Span) -> Result<(), RuntimeFault> {
        if self.cancel.is_cancelled() {
            Err(RuntimeFault::cancelled().at(span))
        } else {
            Ok(())
        }
    }

    /* ----- Store access ----- */

    /// The store to read from: the open transaction's view when there is one.
    pub(crate) fn reader(&self, span: Span) -> Result<&dyn Store, RuntimeFault> {
        if self.in_parallel {
            return Err(parallel_effect("find records", span));
        }
        Ok(match &self.tx {
            Some(tx) => tx.store(),
            None => self.store.store(),
        })
    }

    /// Open the run's transaction before its first persisted mutation.
    /// State is reloaded so the run writes on top of the latest commit.
    pub(crate) async fn writer(&mut self, effect: &str, span: Span) -> Result<&dyn Store, RuntimeFault> {
        if self.in_parallel {
            return Err(parallel_effect(effect, span));
        }
        if self.tx.is_none() {
            let tx = self
                .store
                .begin()
                .await
                .map_err(|e| RuntimeFault::store(e, Some(span)))?;
            if !self.state_dirty {
                self.state = tx
                    .store()
                    .load_state()
                    .await
                    .map_err(|e| RuntimeFault::store(e, Some(span)))?;
            }
            debug!(run_id = %self.run_id, "run transaction opened");
            self.tx = Some(tx);
        }
        match &self.tx {
            Some(tx) => Ok(tx.store()),
            None => Err(RuntimeFault::store(
                crate::store::StoreError::NoActiveTransaction,
                Some(span),
            )),
        }
    }

    /// Mutable access to the state record, inside the run's transaction.
    pub(crate) async fn state_mut(&mut self, span: Span) -> Result<&mut Record, RuntimeFault> {
        self.writer("change state", span).await?;
        self.state_dirty = true;
        Ok(&mut self.state)
    }

    /// Write back changed state and commit the open transaction, if any.
    pub async fn finish(&mut self) -> Result<(), RuntimeFault> {
        if self.state_dirty {
            let state = self.state.clone();
            let store = self.writer("change state", Span::default()).await?;
            store
                .save_state(&state)
                .await
                .map_err(|e| RuntimeFault::store(e, None))?;
            self.state_dirty = false;
        }
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(|e| RuntimeFault::store(e, None))?;
            debug!(run_id = %self.run_id, "run transaction committed");
        }
        Ok(())
    }

    /// Roll back the open transaction, if any.
    pub async fn abort(&mut self) {
        self.state_dirty = false;
        if let Some(tx) = self.tx.take() {
            match tx.rollback().await {
                Ok(()) => debug!(run_id = %self.run_id, "run transaction rolled back"),
                Err(e) => warn!(run_id = %self.run_id, error = %e, "rollback failed"),
            }
        }
    }
}

fn parallel_effect(effect: &str, span: Span) -> RuntimeFault {
    RuntimeFault::new(
        FaultKind::ParallelEffect,
        format!("Parallel tasks cannot {}", effect),
    )
    .at(span)
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("clock", &self.clock)
            .field("in_transaction", &self.tx.is_some())
            .field("in_parallel", &self.in_parallel)
            .finish()
    }
}
