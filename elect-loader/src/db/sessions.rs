//! Import session database operations

use elect_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{ImportCounters, ImportParameters, ImportSession, ImportState};
use crate::utils::{db_retry::DEFAULT_MAX_LOCK_WAIT_MS, retry_on_lock};

/// Save (insert or update) an import session
///
/// Goes through `retry_on_lock` so a busy writer does not lose the update.
pub async fn save_session(pool: &SqlitePool, session: &ImportSession) -> Result<()> {
    // Prepare all data before touching the database
    let session_id = session.session_id.to_string();
    let state = serde_json::to_string(&session.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let parameters = serde_json::to_string(&session.parameters)
        .map_err(|e| Error::Internal(format!("Failed to serialize parameters: {}", e)))?;
    let started_at = session.started_at.to_rfc3339();
    let ended_at = session.ended_at.map(|dt| dt.to_rfc3339());
    let counters = session.counters;

    retry_on_lock("save_session", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO import_sessions (
                session_id, state, source, provider, parameters,
                total, created, updated, skipped,
                last_error, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                state = excluded.state,
                total = excluded.total,
                created = excluded.created,
                updated = excluded.updated,
                skipped = excluded.skipped,
                last_error = excluded.last_error,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&session_id)
        .bind(&state)
        .bind(&session.source)
        .bind(&session.provider)
        .bind(&parameters)
        .bind(counters.total as i64)
        .bind(counters.created as i64)
        .bind(counters.updated as i64)
        .bind(counters.skipped as i64)
        .bind(&session.last_error)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

fn from_row(row: &SqliteRow) -> Result<ImportSession> {
    let state: String = row.get("state");
    let state: ImportState = serde_json::from_str(&state)
        .map_err(|e| Error::Internal(format!("Failed to deserialize state: {}", e)))?;

    let parameters: String = row.get("parameters");
    let parameters: ImportParameters = serde_json::from_str(&parameters)
        .map_err(|e| Error::Internal(format!("Failed to deserialize parameters: {}", e)))?;

    let parse_time = |value: &str| {
        chrono::DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Error::Internal(format!("Failed to parse timestamp: {}", e)))
    };

    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    Ok(ImportSession {
        session_id: parse_uuid(&row.get::<String, _>("session_id"))?,
        state,
        source: row.get("source"),
        provider: row.get("provider"),
        parameters,
        counters: ImportCounters {
            total: row.get::<i64, _>("total") as usize,
            created: row.get::<i64, _>("created") as usize,
            updated: row.get::<i64, _>("updated") as usize,
            skipped: row.get::<i64, _>("skipped") as usize,
        },
        last_error: row.get("last_error"),
        started_at: parse_time(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_time).transpose()?,
    })
}

/// Load import session from database
pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<ImportSession>> {
    let row = sqlx::query("SELECT * FROM import_sessions WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(from_row).transpose()
}

/// Most recent sessions first
pub async fn list_sessions(pool: &SqlitePool, limit: i64) -> Result<Vec<ImportSession>> {
    let rows = sqlx::query("SELECT * FROM import_sessions ORDER BY started_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(from_row).collect()
}
