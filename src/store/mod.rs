//! Transactional record store
//!
//! A [`Store`] persists schema-typed records and one application state
//! record. Both backends ([`MemoryStore`], [`SqliteStore`]) share the same
//! transaction semantics:
//!
//! - at most one active transaction; a second `begin()` is
//!   [`StoreError::NestedTransaction`]
//! - `rollback()` discards every mutation since `begin()`
//! - writes join the open transaction; with none open they commit
//!   immediately
//! - plain reads see committed data only; reads through
//!   [`Store::transaction_view`] also see the open transaction's writes
//! - ids are assigned per schema from 1 and never reused, even after a
//!   rollback
//!
//! Runs do not call `begin()` directly. They go through a [`StoreHandle`],
//! whose gate serializes transactions from concurrent runs.

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::schema::{RecordSchema, ID_FIELD};
use crate::value::{Decimal, Record, Value};

#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logs ("memory", "sqlite")
    fn backend(&self) -> &'static str;

    /// Prepare storage for `schema`. Called once per schema when a program
    /// is loaded; saving to an unregistered schema registers it.
    async fn register_schema(&self, schema: &RecordSchema) -> StoreResult<()>;

    async fn begin(&self) -> StoreResult<()>;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;

    /// The same store, reading through the open transaction.
    fn transaction_view(&self) -> &dyn Store;

    /// Validate `record` against `schema`, assign the next id and store it.
    /// Returns the stored record with its `id` field first.
    async fn save(&self, schema: &RecordSchema, record: &Record) -> StoreResult<Record>;

    /// Every row of `schema`, in insertion order or by the schema's
    /// `order by` field.
    async fn list(&self, schema: &RecordSchema) -> StoreResult<Vec<Record>>;

    async fn find(
        &self,
        schema: &RecordSchema,
        predicate: &(dyn for<'r> Fn(&'r Record) -> bool + Send + Sync),
    ) -> StoreResult<Vec<Record>> {
        let rows = self.list(schema).await?;
        Ok(rows.into_iter().filter(|r| predicate(r)).collect())
    }

    async fn load_state(&self) -> StoreResult<Record>;

    async fn save_state(&self, state: &Record) -> StoreResult<()>;
}

/* ===================== Shared helpers ===================== */

/// Which data a store's reads see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    Committed,
    Transaction,
}

/// Schema validation plus uniqueness against the rows already stored.
pub(crate) fn validate_for_save(
    schema: &RecordSchema,
    record: &Record,
    existing: &[Record],
) -> StoreResult<Record> {
    let normalized = schema
        .validate(record)
        .map_err(|violation| StoreError::ConstraintViolation {
            schema: schema.name.clone(),
            field: violation.field,
            message: violation.message,
        })?;

    for field in schema.unique_fields() {
        let Some(value) = normalized.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if existing.iter().any(|row| row.get(&field.name) == Some(value)) {
            return Err(StoreError::ConstraintViolation {
                schema: schema.name.clone(),
                field: field.name.clone(),
                message: format!("Field '{}' must be unique", field.name),
            });
        }
    }
    Ok(normalized)
}

/// Put `id` first, followed by the validated fields.
pub(crate) fn with_id(id: u64, record: Record) -> Record {
    let mut out = Record::new();
    out.insert(ID_FIELD, Value::Number(Decimal::from_i64(id as i64)));
    for (key, value) in record {
        out.insert(key, value);
    }
    out
}

/// Apply the schema's `order by` key. Rows arrive in insertion order; the
/// sort is stable so ties keep it.
pub(crate) fn apply_ordering(schema: &RecordSchema, rows: &mut [Record]) {
    let Some(key) = &schema.order_by else {
        return;
    };
    rows.sort_by(|a, b| compare_values(a.get(key), b.get(key)));
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.cmp(y),
        (Some(Value::Text(x)), Some(Value::Text(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        // Nulls sort last
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/* ===================== Handle and transactions ===================== */

/// Shared access to a store. Cloning shares the store and its gate.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn Store>,
    gate: Arc<Mutex<()>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Wait for the gate, then open a transaction on the store.
    pub async fn begin(&self) -> StoreResult<Transaction> {
        let guard = self.gate.clone().lock_owned().await;
        self.store.begin().await?;
        debug!(backend = self.store.backend(), "transaction opened");
        Ok(Transaction {
            store: self.store.clone(),
            guard: Some(guard),
        })
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("backend", &self.store.backend())
            .finish()
    }
}

/// An open transaction. Holds the handle's gate until it is committed or
/// rolled back. Dropping it unfinished schedules a rollback.
pub struct Transaction {
    store: Arc<dyn Store>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Transaction {
    /// Reads through this sees the transaction's own writes.
    pub fn store(&self) -> &dyn Store {
        self.store.transaction_view()
    }

    pub async fn commit(mut self) -> StoreResult<()> {
        let result = self.store.commit().await;
        self.guard.take();
        debug!(backend = self.store.backend(), ok = result.is_ok(), "transaction committed");
        result
    }

    pub async fn rollback(mut self) -> StoreResult<()> {
        let result = self.store.rollback().await;
        self.guard.take();
        debug!(backend = self.store.backend(), "transaction rolled back");
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = store.rollback().await {
                        warn!(error = %e, "rollback of abandoned transaction failed");
                    }
                    drop(guard);
                });
            }
            Err(_) => warn!("transaction dropped outside a runtime; it was not rolled back"),
        }
    }
}

#[cfg(test)]
mod tests;
