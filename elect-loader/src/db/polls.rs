//! Poll and candidate database operations

use elect_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{Candidate, Poll, PollDefinition};

/// Ensure the poll and its candidates exist, returning their identities
///
/// Idempotent. Names are matched case-insensitively (Unicode lower case, so
/// Cyrillic names fold too). Missing candidates are appended. Runs in one
/// transaction.
pub async fn ensure_poll_exists(pool: &SqlitePool, definition: &PollDefinition) -> Result<Poll> {
    let mut tx = pool.begin().await?;

    let wanted = definition.name.to_lowercase();
    let polls = sqlx::query("SELECT id, name FROM polls")
        .fetch_all(&mut *tx)
        .await?;

    let existing = polls.iter().find_map(|row| {
        let name: String = row.get("name");
        (name.to_lowercase() == wanted).then(|| (row.get::<String, _>("id"), name))
    });

    let (poll_id, poll_name) = match existing {
        Some((id, name)) => (parse_uuid(&id)?, name),
        None => {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO polls (id, name) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(&definition.name)
                .execute(&mut *tx)
                .await?;
            tracing::info!(poll_id = %id, name = %definition.name, "Poll created");
            (id, definition.name.clone())
        }
    };

    let rows = sqlx::query("SELECT id, name, idx FROM candidates WHERE poll_id = ? ORDER BY idx")
        .bind(poll_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

    let mut stored = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.get("id");
        stored.push(Candidate {
            id: parse_uuid(&id)?,
            name: row.get("name"),
            index: row.get("idx"),
        });
    }

    let mut next_index = stored.iter().map(|c| c.index + 1).max().unwrap_or(0);
    let mut candidates = Vec::with_capacity(definition.candidates.len());
    for name in &definition.candidates {
        let lowered = name.to_lowercase();
        if let Some(found) = stored.iter().find(|c| c.name.to_lowercase() == lowered) {
            candidates.push(found.clone());
            continue;
        }

        let candidate = Candidate {
            id: Uuid::new_v4(),
            name: name.clone(),
            index: next_index,
        };
        sqlx::query("INSERT INTO candidates (id, poll_id, name, idx) VALUES (?, ?, ?, ?)")
            .bind(candidate.id.to_string())
            .bind(poll_id.to_string())
            .bind(&candidate.name)
            .bind(candidate.index)
            .execute(&mut *tx)
            .await?;
        next_index += 1;
        candidates.push(candidate);
    }

    tx.commit().await?;

    Ok(Poll {
        id: poll_id,
        name: poll_name,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let pool = setup().await;
        let def = PollDefinition::state_duma_2011();

        let first = ensure_poll_exists(&pool, &def).await.unwrap();
        let second = ensure_poll_exists(&pool, &def).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.candidates.len(), 7);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM candidates")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn test_names_match_case_insensitively() {
        let pool = setup().await;
        let def = PollDefinition::state_duma_2011();
        let first = ensure_poll_exists(&pool, &def).await.unwrap();

        let shouted = PollDefinition {
            name: def.name.to_uppercase(),
            candidates: def.candidates.iter().map(|c| c.to_uppercase()).collect(),
        };
        let second = ensure_poll_exists(&pool, &shouted).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.candidates, first.candidates);
    }
}
