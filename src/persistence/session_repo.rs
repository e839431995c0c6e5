//! Chat session store backed by `SQLite`.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::debug;

use crate::models::session::{FreshnessPolicy, ThreadSession};
use crate::{AppError, Result};

use super::db::Database;

/// Durable `chat_id → thread_id` mapping with a freshness policy.
///
/// At most one row exists per chat. The pool serializes concurrent callers,
/// so the store can be cloned freely across tasks.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    policy: FreshnessPolicy,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    chat_id: String,
    thread_id: String,
    created_at: i64,
    updated_at: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<ThreadSession> {
        Ok(ThreadSession {
            created_at: from_unix(self.created_at, "created_at")?,
            updated_at: from_unix(self.updated_at, "updated_at")?,
            chat_id: self.chat_id,
            thread_id: self.thread_id,
        })
    }
}

fn from_unix(secs: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::Db(format!("invalid {field}: {secs}")))
}

impl SessionStore {
    /// Create a store over `db` applying `policy`.
    #[must_use]
    pub fn new(db: Arc<Database>, policy: FreshnessPolicy) -> Self {
        Self { db, policy }
    }

    /// Freshness policy in effect.
    #[must_use]
    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Map `chat_id` to `thread_id`, replacing any previous mapping.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn create(&self, chat_id: &str, thread_id: &str) -> Result<ThreadSession> {
        let session = ThreadSession::new(chat_id.to_owned(), thread_id.to_owned(), now_secs());

        sqlx::query(
            "INSERT INTO session (chat_id, thread_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(&session.chat_id)
        .bind(&session.thread_id)
        .bind(session.created_at.timestamp())
        .bind(session.updated_at.timestamp())
        .execute(self.db.as_ref())
        .await?;

        Ok(session)
    }

    /// Fetch the session for `chat_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_chat_id(&self, chat_id: &str) -> Result<Option<ThreadSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT chat_id, thread_id, created_at, updated_at FROM session WHERE chat_id = ?1",
        )
        .bind(chat_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Point an existing session at a new thread and refresh `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no session exists for `chat_id`.
    pub async fn update(&self, chat_id: &str, thread_id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE session SET thread_id = ?1, updated_at = ?2 WHERE chat_id = ?3")
                .bind(thread_id)
                .bind(now_secs().timestamp())
                .bind(chat_id)
                .execute(self.db.as_ref())
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("no session for chat {chat_id}")));
        }
        Ok(())
    }

    /// Refresh `updated_at` to now. A missing session is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn touch(&self, chat_id: &str) -> Result<()> {
        sqlx::query("UPDATE session SET updated_at = ?1 WHERE chat_id = ?2")
            .bind(now_secs().timestamp())
            .bind(chat_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Remove the session for `chat_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session WHERE chat_id = ?1")
            .bind(chat_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Every stored session, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<ThreadSession>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT chat_id, thread_id, created_at, updated_at FROM session")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Whether `entry` may be reused right now, judged in local time.
    #[must_use]
    pub fn is_fresh(&self, entry: Option<&ThreadSession>) -> bool {
        self.policy.is_fresh_at(entry, &Local::now())
    }

    /// Delete every stale session and return how many were removed.
    ///
    /// A no-op returning `0` when the idle timeout is disabled, whatever the
    /// daily-reset setting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if listing or deleting fails.
    pub async fn cleanup_stale(&self) -> Result<u64> {
        if !self.policy.idle_check_enabled() {
            return Ok(0);
        }

        let now = Local::now();
        let mut removed = 0;
        for entry in self.list_all().await? {
            if !self.policy.is_fresh_at(Some(&entry), &now) {
                self.delete(&entry.chat_id).await?;
                debug!(chat_id = entry.chat_id.as_str(), "removed stale session");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Current time truncated to whole seconds, matching stored resolution.
fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}
