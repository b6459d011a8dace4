//! Embedded key-value backing for the Session Store.
//!
//! Each session is one row keyed by its identifier; the whole session is
//! stored as a single serialized JSON document, matching the
//! `session:<identifier>` key scheme of spec.md §6. This is the same
//! "JSON document behind a SQLite connection pool" approach the teacher
//! uses for its own checkpoint store, generalized from "latest checkpoint
//! per workflow session" to "latest document per telemetry session".

use chrono::{DateTime, Utc};
use datacat_common::Session;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{Result, StoreError};

#[instrument(skip(database_url))]
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("connect error: {e}"),
        })?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS sessions_created_at ON sessions (created_at)")
        .execute(&pool)
        .await?;
    Ok(pool)
}

#[instrument(skip(pool, session), err)]
pub async fn upsert(pool: &SqlitePool, session: &Session) -> Result<()> {
    let document = serde_json::to_string(session)?;
    sqlx::query(
        r#"
        INSERT INTO sessions (id, document, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET document = excluded.document
        "#,
    )
    .bind(&session.id)
    .bind(document)
    .bind(session.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<Session>> {
    let rows = sqlx::query("SELECT document FROM sessions").fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            let document: String = row.try_get("document")?;
            Ok(serde_json::from_str(&document)?)
        })
        .collect()
}

/// Deletes every session created before `cutoff`, returning the deleted
/// identifiers so the in-memory table can be pruned to match.
#[instrument(skip(pool))]
pub async fn delete_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT id FROM sessions WHERE created_at < ?1")
        .bind(cutoff.to_rfc3339())
        .fetch_all(pool)
        .await?;
    let ids: Vec<String> = rows
        .iter()
        .map(|row| row.try_get::<String, _>("id"))
        .collect::<std::result::Result<_, _>>()?;
    sqlx::query("DELETE FROM sessions WHERE created_at < ?1")
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(ids)
}
