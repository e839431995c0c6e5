//! `SQLite` schema bootstrap logic.
//!
//! Uses `CREATE TABLE IF NOT EXISTS`, so it is safe to run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Create the `session` table if it does not exist.
///
/// Timestamps are unix seconds.
///
/// # Errors
///
/// Returns `AppError::Db` if the DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    chat_id     TEXT PRIMARY KEY NOT NULL,
    thread_id   TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_updated ON session(updated_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
