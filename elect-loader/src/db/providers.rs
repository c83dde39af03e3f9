//! Result provider database operations

use elect_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::ResultProvider;

pub async fn load_provider_by_name(pool: &SqlitePool, name: &str) -> Result<Option<ResultProvider>> {
    let row = sqlx::query("SELECT id, name, is_file FROM result_providers WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            Ok(Some(ResultProvider {
                id: parse_uuid(&id)?,
                name: row.get("name"),
                is_file: row.get::<i64, _>("is_file") != 0,
            }))
        }
        None => Ok(None),
    }
}

pub async fn create_provider(
    pool: &SqlitePool,
    name: &str,
    is_file: bool,
    poll_id: Uuid,
) -> Result<ResultProvider> {
    let provider = ResultProvider {
        id: Uuid::new_v4(),
        name: name.to_string(),
        is_file,
    };

    sqlx::query("INSERT INTO result_providers (id, name, is_file, poll_id) VALUES (?, ?, ?, ?)")
        .bind(provider.id.to_string())
        .bind(&provider.name)
        .bind(is_file as i64)
        .bind(poll_id.to_string())
        .execute(pool)
        .await?;

    tracing::info!(provider_id = %provider.id, name = %provider.name, "Result provider created");
    Ok(provider)
}

/// Look the provider up by name, creating it when absent
///
/// The flag is true when the provider was created by this call.
pub async fn get_or_create_provider(
    pool: &SqlitePool,
    name: &str,
    is_file: bool,
    poll_id: Uuid,
) -> Result<(ResultProvider, bool)> {
    if let Some(existing) = load_provider_by_name(pool, name).await? {
        return Ok((existing, false));
    }
    Ok((create_provider(pool, name, is_file, poll_id).await?, true))
}
