//! Durable store on SQLite
//!
//! One table per record schema (`n3_rec_<name>`, rows as canonical JSON),
//! `n3_sequences` for id high-water marks and `n3_state` for the
//! application state record. While a transaction is open every write runs
//! on its connection, and so do reads through the transaction view; plain
//! reads always go to the pool and see committed rows only.
//!
//! Sequences are served from memory and written through on every save. A
//! rollback undoes that write, so the high-water marks are written again on
//! the pool right after it.

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{apply_ordering, validate_for_save, with_id, Store, StoreError, StoreResult, View};
use crate::schema::RecordSchema;
use crate::value::Record;

struct Shared {
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
    active: AtomicBool,
    sequences: parking_lot::Mutex<HashMap<String, u64>>,
}

pub struct SqliteStore {
    shared: Arc<Shared>,
    view: View,
    /// Transaction view over the same database; `None` on the view itself
    transaction: Option<Box<SqliteStore>>,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!(path = %path.as_ref().display(), "opened sqlite store");
        Self::with_pool(pool).await
    }

    /// A private in-memory database. Uses a single connection, since each
    /// SQLite memory connection is its own database, so committed reads
    /// wait while a transaction holds it.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        migrate(&pool).await?;
        let sequences = load_sequences(&pool).await?;
        let shared = Arc::new(Shared {
            pool,
            tx: Mutex::new(None),
            active: AtomicBool::new(false),
            sequences: parking_lot::Mutex::new(sequences),
        });
        Ok(Self {
            transaction: Some(Box::new(Self {
                shared: shared.clone(),
                view: View::Transaction,
                transaction: None,
            })),
            shared,
            view: View::Committed,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.shared.pool
    }

    fn next_id(&self, schema: &str) -> u64 {
        let mut sequences = self.shared.sequences.lock();
        let next = sequences.entry(schema.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    async fn restore_sequences(&self) -> StoreResult<()> {
        let snapshot: Vec<(String, u64)> = self
            .shared
            .sequences
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (schema, value) in snapshot {
            write_sequence(self.pool(), &schema, value).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn register_schema(&self, schema: &RecordSchema) -> StoreResult<()> {
        let mut tx = self.shared.tx.lock().await;
        match tx.as_mut() {
            Some(tx) => create_table(&mut **tx, &schema.name).await,
            None => create_table(self.pool(), &schema.name).await,
        }
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut tx = self.shared.tx.lock().await;
        if tx.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        *tx = Some(self.pool().begin().await?);
        self.shared.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut guard = self.shared.tx.lock().await;
        let tx = guard.take().ok_or(StoreError::NoActiveTransaction)?;
        self.shared.active.store(false, Ordering::SeqCst);
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut guard = self.shared.tx.lock().await;
        let tx = guard.take().ok_or(StoreError::NoActiveTransaction)?;
        self.shared.active.store(false, Ordering::SeqCst);
        tx.rollback().await?;
        drop(guard);
        self.restore_sequences().await?;
        debug!("sqlite transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn transaction_view(&self) -> &dyn Store {
        match &self.transaction {
            Some(view) => view.as_ref(),
            None => self,
        }
    }

    async fn save(&self, schema: &RecordSchema, record: &Record) -> StoreResult<Record> {
        let mut guard = self.shared.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => {
                create_table(&mut **tx, &schema.name).await?;
                let existing = select_rows(&mut **tx, &schema.name).await?;
                let normalized = validate_for_save(schema, record, &existing)?;
                let id = self.next_id(&schema.name);
                let stored = with_id(id, normalized);
                insert_row(&mut **tx, &schema.name, id, &stored).await?;
                write_sequence(&mut **tx, &schema.name, id).await?;
                Ok(stored)
            }
            None => {
                let pool = self.pool();
                create_table(pool, &schema.name).await?;
                let existing = select_rows(pool, &schema.name).await?;
                let normalized = validate_for_save(schema, record, &existing)?;
                let id = self.next_id(&schema.name);
                let stored = with_id(id, normalized);
                insert_row(pool, &schema.name, id, &stored).await?;
                write_sequence(pool, &schema.name, id).await?;
                Ok(stored)
            }
        }
    }

    async fn list(&self, schema: &RecordSchema) -> StoreResult<Vec<Record>> {
        if self.view == View::Transaction {
            let mut guard = self.shared.tx.lock().await;
            if let Some(tx) = guard.as_mut() {
                create_table(&mut **tx, &schema.name).await?;
                let mut rows = select_rows(&mut **tx, &schema.name).await?;
                apply_ordering(schema, &mut rows);
                return Ok(rows);
            }
        }
        // Committed reads never hold the transaction lock: on a single
        // connection pool they wait for the transaction to end.
        if !table_exists(self.pool(), &schema.name).await? {
            return Ok(Vec::new());
        }
        let mut rows = select_rows(self.pool(), &schema.name).await?;
        apply_ordering(schema, &mut rows);
        Ok(rows)
    }

    async fn load_state(&self) -> StoreResult<Record> {
        const QUERY: &str = "SELECT data FROM n3_state WHERE id = 1";
        let mut row: Option<(String,)> = None;
        let mut read = false;
        if self.view == View::Transaction {
            let mut guard = self.shared.tx.lock().await;
            if let Some(tx) = guard.as_mut() {
                row = sqlx::query_as(QUERY).fetch_optional(&mut **tx).await?;
                read = true;
            }
        }
        if !read {
            row = sqlx::query_as(QUERY).fetch_optional(self.pool()).await?;
        }
        match row {
            Some((data,)) => decode_record("state", &data),
            None => Ok(Record::new()),
        }
    }

    async fn save_state(&self, state: &Record) -> StoreResult<()> {
        let data = encode_record("state", state)?;
        let query = sqlx::query(
            r#"
            INSERT INTO n3_state (id, data) VALUES (1, ?1)
            ON CONFLICT (id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(data);
        let mut guard = self.shared.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(self.pool()).await?,
        };
        Ok(())
    }
}

/* ===================== Queries ===================== */

async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS n3_sequences (
            schema_name TEXT PRIMARY KEY,
            high_water INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS n3_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn load_sequences(pool: &SqlitePool) -> StoreResult<HashMap<String, u64>> {
    let rows = sqlx::query("SELECT schema_name, high_water FROM n3_sequences")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let name: String = row.get("schema_name");
            let high_water: i64 = row.get("high_water");
            (name, high_water.max(0) as u64)
        })
        .collect())
}

fn table_name(schema: &str) -> String {
    format!("\"n3_rec_{}\"", schema.replace('"', "\"\""))
}

async fn create_table<'e, E>(executor: E, schema: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, data TEXT NOT NULL)",
        table_name(schema)
    );
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

async fn table_exists<'e, E>(executor: E, schema: &str) -> StoreResult<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(format!("n3_rec_{}", schema))
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

async fn select_rows<'e, E>(executor: E, schema: &str) -> StoreResult<Vec<Record>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT data FROM {} ORDER BY id", table_name(schema));
    let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(executor).await?;
    rows.iter()
        .map(|(data,)| decode_record(schema, data))
        .collect()
}

async fn insert_row<'e, E>(executor: E, schema: &str, id: u64, record: &Record) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("INSERT INTO {} (id, data) VALUES (?1, ?2)", table_name(schema));
    sqlx::query(&sql)
        .bind(id as i64)
        .bind(encode_record(schema, record)?)
        .execute(executor)
        .await?;
    Ok(())
}

async fn write_sequence<'e, E>(executor: E, schema: &str, high_water: u64) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO n3_sequences (schema_name, high_water) VALUES (?1, ?2)
        ON CONFLICT (schema_name) DO UPDATE
        SET high_water = MAX(high_water, excluded.high_water)
        "#,
    )
    .bind(schema)
    .bind(high_water as i64)
    .execute(executor)
    .await?;
    Ok(())
}

fn encode_record(schema: &str, record: &Record) -> StoreResult<String> {
    serde_json::to_string(record).map_err(|e| StoreError::Codec {
        schema: schema.to_string(),
        message: e.to_string(),
    })
}

fn decode_record(schema: &str, data: &str) -> StoreResult<Record> {
    serde_json::from_str::<Record>(data).map_err(|e| StoreError::Codec {
        schema: schema.to_string(),
        message: e.to_string(),
    })
}

