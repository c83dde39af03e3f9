//! Database access for elect-loader
//!
//! Free async functions over a `SqlitePool`. Ids are UUID v4 stored as TEXT.

pub mod commissions;
pub mod polls;
pub mod protocols;
pub mod providers;
pub mod regions;
pub mod sessions;

use anyhow::Result;
use elect_common::Error;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Initialize database connection pool
///
/// Creates the file (and its parent folder) when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS regions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commissions (
            id TEXT PRIMARY KEY,
            region_id TEXT NOT NULL REFERENCES regions(id),
            number INTEGER NOT NULL,
            UNIQUE (region_id, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polls (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
            id TEXT PRIMARY KEY,
            poll_id TEXT NOT NULL REFERENCES polls(id),
            name TEXT NOT NULL,
            idx INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS result_providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_file INTEGER NOT NULL DEFAULT 0,
            poll_id TEXT REFERENCES polls(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let value_columns = protocols::SUMMARY_COLUMNS
        .iter()
        .map(|c| format!("{} INTEGER NOT NULL", c))
        .collect::<Vec<_>>()
        .join(",\n            ");
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS protocols (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL REFERENCES result_providers(id),
            commission_id TEXT NOT NULL REFERENCES commissions(id),
            {},
            UNIQUE (provider_id, commission_id)
        )
        "#,
        value_columns
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocol_results (
            id TEXT PRIMARY KEY,
            protocol_id TEXT NOT NULL REFERENCES protocols(id) ON DELETE CASCADE,
            candidate_id TEXT NOT NULL REFERENCES candidates(id),
            value INTEGER NOT NULL,
            idx INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocol_images (
            id TEXT PRIMARY KEY,
            protocol_id TEXT NOT NULL REFERENCES protocols(id) ON DELETE CASCADE,
            uri TEXT,
            image BLOB,
            idx INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_sessions (
            session_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            source TEXT NOT NULL,
            provider TEXT NOT NULL,
            parameters TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}

/// Parse a TEXT id column
pub(crate) fn parse_uuid(value: &str) -> elect_common::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid id '{}': {}", value, e)))
}
