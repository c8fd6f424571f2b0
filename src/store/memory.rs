//! In-memory store
//!
//! Committed data lives in one snapshot; `begin()` clones it into a working
//! copy that `commit()` swaps in and `rollback()` drops. Writes land in the
//! working copy while there is one, but only the transaction view reads it.
//! Id sequences sit outside the snapshots so a rollback never rewinds them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{apply_ordering, validate_for_save, with_id, Store, StoreError, StoreResult, View};
use crate::schema::RecordSchema;
use crate::value::Record;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    rows: BTreeMap<String, Vec<Record>>,
    state: Record,
}

#[derive(Debug, Default)]
struct Inner {
    committed: Snapshot,
    working: Option<Snapshot>,
    sequences: HashMap<String, u64>,
}

impl Inner {
    fn read(&self, view: View) -> &Snapshot {
        match (view, &self.working) {
            (View::Transaction, Some(working)) => working,
            _ => &self.committed,
        }
    }

    fn write(&mut self) -> &mut Snapshot {
        match self.working {
            Some(ref mut working) => working,
            None => &mut self.committed,
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    view: View,
    /// Transaction view over the same data; `None` on the view itself
    transaction: Option<Box<MemoryStore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        Self {
            transaction: Some(Box::new(Self {
                inner: inner.clone(),
                view: View::Transaction,
                transaction: None,
            })),
            inner,
            view: View::Committed,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn register_schema(&self, schema: &RecordSchema) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.write().rows.entry(schema.name.clone()).or_default();
        Ok(())
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.working.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        inner.working = Some(inner.committed.clone());
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let working = inner.working.take().ok_or(StoreError::NoActiveTransaction)?;
        inner.committed = working;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .working
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoActiveTransaction)
    }

    fn in_transaction(&self) -> bool {
        self.inner.lock().working.is_some()
    }

    fn transaction_view(&self) -> &dyn Store {
        match &self.transaction {
            Some(view) => view.as_ref(),
            None => self,
        }
    }

    async fn save(&self, schema: &RecordSchema, record: &Record) -> StoreResult<Record> {
        let mut inner = self.inner.lock();
        let existing = inner
            .read(View::Transaction)
            .rows
            .get(&schema.name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let normalized = validate_for_save(schema, record, existing)?;

        let sequence = inner.sequences.entry(schema.name.clone()).or_insert(0);
        *sequence += 1;
        let stored = with_id(*sequence, normalized);

        inner
            .write()
            .rows
            .entry(schema.name.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, schema: &RecordSchema) -> StoreResult<Vec<Record>> {
        let inner = self.inner.lock();
        let mut rows = inner
            .read(self.view)
            .rows
            .get(&schema.name)
            .cloned()
            .unwrap_or_default();
        apply_ordering(schema, &mut rows);
        Ok(rows)
    }

    async fn load_state(&self) -> StoreResult<Record> {
        Ok(self.inner.lock().read(self.view).state.clone())
    }

    async fn save_state(&self, state: &Record) -> StoreResult<()> {
        self.inner.lock().write().state = state.clone();
        Ok(())
    }
}
