//! Unit tests for the `SQLite`-backed session store.

use std::sync::Arc;

use agent_bridge::models::session::FreshnessPolicy;
use agent_bridge::persistence::db;
use agent_bridge::persistence::session_repo::SessionStore;
use agent_bridge::AppError;

const POLICY: FreshnessPolicy = FreshnessPolicy {
    idle_timeout_minutes: 60,
    daily_reset_hour: -1,
};

async fn store() -> (Arc<db::Database>, SessionStore) {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    (Arc::clone(&pool), SessionStore::new(pool, POLICY))
}

async fn age(pool: &db::Database, chat_id: &str, minutes: i64) {
    sqlx::query("UPDATE session SET updated_at = updated_at - ? WHERE chat_id = ?")
        .bind(minutes * 60)
        .bind(chat_id)
        .execute(pool)
        .await
        .expect("age session");
}

#[tokio::test]
async fn in_memory_connect_creates_session_table() {
    let pool = db::connect_memory().await.expect("in-memory db");
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session")
        .fetch_one(&pool)
        .await
        .expect("session table queryable");
    assert_eq!(row.0, 0);
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let (_, store) = store().await;

    let created = store.create("C1", "thread-a").await.expect("create");
    let fetched = store
        .get_by_chat_id("C1")
        .await
        .expect("get")
        .expect("present");

    assert_eq!(fetched, created);
    assert_eq!(fetched.thread_id, "thread-a");
    assert!(store.is_fresh(Some(&fetched)));
}

#[tokio::test]
async fn create_replaces_existing_mapping() {
    let (_, store) = store().await;

    store.create("C1", "thread-a").await.expect("first create");
    store.create("C1", "thread-b").await.expect("second create");

    let all = store.list_all().await.expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].thread_id, "thread-b");
}

#[tokio::test]
async fn get_missing_is_none() {
    let (_, store) = store().await;
    assert!(store.get_by_chat_id("nope").await.expect("get").is_none());
    assert!(!store.is_fresh(None));
}

#[tokio::test]
async fn update_missing_is_not_found() {
    let (_, store) = store().await;
    let err = store.update("nope", "t").await.expect_err("must fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn touch_refreshes_idle_session() {
    let (pool, store) = store().await;
    store.create("C1", "thread-a").await.expect("create");
    age(&pool, "C1", 120).await;

    let stale = store.get_by_chat_id("C1").await.expect("get");
    assert!(!store.is_fresh(stale.as_ref()));

    store.touch("C1").await.expect("touch");
    let fresh = store.get_by_chat_id("C1").await.expect("get");
    assert!(store.is_fresh(fresh.as_ref()));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_, store) = store().await;
    store.create("C1", "thread-a").await.expect("create");

    store.delete("C1").await.expect("first delete");
    store.delete("C1").await.expect("second delete");
    assert!(store.get_by_chat_id("C1").await.expect("get").is_none());
}

#[tokio::test]
async fn cleanup_removes_only_stale_sessions() {
    let (pool, store) = store().await;
    store.create("old", "t-old").await.expect("create old");
    store.create("new", "t-new").await.expect("create new");
    age(&pool, "old", 90).await;

    let removed = store.cleanup_stale().await.expect("cleanup");

    assert_eq!(removed, 1);
    assert!(store.get_by_chat_id("old").await.expect("get").is_none());
    assert!(store.get_by_chat_id("new").await.expect("get").is_some());
}

#[tokio::test]
async fn cleanup_is_noop_when_idle_check_disabled() {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let store = SessionStore::new(
        Arc::clone(&pool),
        FreshnessPolicy {
            idle_timeout_minutes: 0,
            daily_reset_hour: 4,
        },
    );
    store.create("old", "t-old").await.expect("create");
    age(&pool, "old", 60 * 24 * 3).await;

    assert_eq!(store.cleanup_stale().await.expect("cleanup"), 0);
    assert!(store.get_by_chat_id("old").await.expect("get").is_some());
}

#[tokio::test]
async fn file_database_creates_parent_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("sessions.db");

    let pool = db::connect(&path).await.expect("file db");
    let store = SessionStore::new(Arc::new(pool), POLICY);
    store.create("C1", "thread-a").await.expect("create");

    assert!(path.exists());
}
