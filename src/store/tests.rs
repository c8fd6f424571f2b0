use super::*;
use crate::schema::{BaseType, FieldConstraint, FieldSchema};

fn note_schema() -> RecordSchema {
    RecordSchema::new(
        "Note",
        vec![
            FieldSchema {
                name: "title".to_string(),
                field_type: BaseType::Text,
                constraints: vec![FieldConstraint::Present, FieldConstraint::Unique],
            },
            FieldSchema {
                name: "rank".to_string(),
                field_type: BaseType::Int,
                constraints: vec![],
            },
        ],
    )
}

fn note(title: &str, rank: i64) -> Record {
    [("title", Value::text(title)), ("rank", Value::int(rank))]
        .into_iter()
        .collect()
}

fn titles(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| r.get("title").and_then(Value::as_text).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_memory_rollback_discards_but_keeps_sequence() {
    let store = MemoryStore::new();
    let schema = note_schema();

    let first = store.save(&schema, &note("a", 1)).await.unwrap();
    assert_eq!(first.get("id"), Some(&Value::int(1)));
    assert_eq!(first.keys().collect::<Vec<_>>(), vec!["id", "title", "rank"]);

    store.begin().await.unwrap();
    assert!(store.in_transaction());
    store.save(&schema, &note("b", 2)).await.unwrap();
    assert_eq!(store.transaction_view().list(&schema).await.unwrap().len(), 2);
    assert_eq!(titles(&store.list(&schema).await.unwrap()), vec!["a"]);
    store.rollback().await.unwrap();

    assert_eq!(titles(&store.list(&schema).await.unwrap()), vec!["a"]);
    let third = store.save(&schema, &note("c", 3)).await.unwrap();
    assert_eq!(third.get("id"), Some(&Value::int(3)));
}

#[tokio::test]
async fn test_memory_transaction_misuse() {
    let store = MemoryStore::new();
    assert!(matches!(store.commit().await, Err(StoreError::NoActiveTransaction)));
    store.begin().await.unwrap();
    let err = store.begin().await.unwrap_err();
    assert_eq!(err.error_id(), "store.nested_transaction");
    store.commit().await.unwrap();
    assert!(!store.in_transaction());
}

#[tokio::test]
async fn test_unique_and_order_by() {
    let mut schema = note_schema();
    schema.order_by = Some("rank".to_string());
    let store = MemoryStore::new();

    store.save(&schema, &note("late", 9)).await.unwrap();
    store.save(&schema, &note("early", 1)).await.unwrap();
    assert_eq!(titles(&store.list(&schema).await.unwrap()), vec!["early", "late"]);

    let err = store.save(&schema, &note("late", 3)).await.unwrap_err();
    match err {
        StoreError::ConstraintViolation { schema, field, .. } => {
            assert_eq!(schema, "Note");
            assert_eq!(field, "title");
        }
        other => panic!("unexpected {:?}", other),
    }

    let found = store
        .find(&schema, &|r: &Record| r.get("rank") == Some(&Value::int(9)))
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["late"]);
}

#[tokio::test]
async fn test_state_follows_transactions() {
    let store = MemoryStore::new();
    let state: Record = [("count", Value::int(1))].into_iter().collect();
    store.save_state(&state).await.unwrap();

    store.begin().await.unwrap();
    let changed: Record = [("count", Value::int(2))].into_iter().collect();
    store.save_state(&changed).await.unwrap();
    assert_eq!(store.load_state().await.unwrap(), state);
    assert_eq!(store.transaction_view().load_state().await.unwrap(), changed);
    store.rollback().await.unwrap();

    assert_eq!(store.load_state().await.unwrap(), state);
}

#[tokio::test]
async fn test_sqlite_reopen_keeps_rows_and_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let schema = note_schema();

    {
        let store = SqliteStore::open(&path, 2).await.unwrap();
        store.save(&schema, &note("a", 1)).await.unwrap();
        store.begin().await.unwrap();
        store.save(&schema, &note("b", 2)).await.unwrap();
        store.rollback().await.unwrap();
        store.pool().close().await;
    }

    let store = SqliteStore::open(&path, 2).await.unwrap();
    assert_eq!(titles(&store.list(&schema).await.unwrap()), vec!["a"]);
    let next = store.save(&schema, &note("c", 3)).await.unwrap();
    assert_eq!(next.get("id"), Some(&Value::int(3)));
}

#[tokio::test]
async fn test_handle_serializes_transactions() {
    let handle = StoreHandle::memory();
    let schema = note_schema();

    let tx = handle.begin().await.unwrap();
    tx.store().save(&schema, &note("a", 1)).await.unwrap();

    let other = handle.clone();
    let waiter = tokio::spawn(async move { other.begin().await.map(|tx| tx.store().in_transaction()) });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    tx.commit().await.unwrap();
    let in_tx = waiter.await.unwrap().unwrap();
    assert!(in_tx);
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let handle = StoreHandle::memory();
    let schema = note_schema();
    {
        let tx = handle.begin().await.unwrap();
        tx.store().save(&schema, &note("lost", 1)).await.unwrap();
    }
    // The rollback runs on a spawned task and releases the gate when done
    let tx = handle.begin().await.unwrap();
    assert!(tx.store().list(&schema).await.unwrap().is_empty());
    tx.rollback().await.unwrap();
}
