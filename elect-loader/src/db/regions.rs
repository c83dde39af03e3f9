//! Region database operations

use elect_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::parse_uuid;
use crate::models::Region;

/// Load every region, ordered by name
pub async fn load_all_regions(pool: &SqlitePool) -> Result<Vec<Region>> {
    let rows = sqlx::query("SELECT id, name FROM regions ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            Ok(Region::existing(parse_uuid(&id)?, row.get::<String, _>("name")))
        })
        .collect()
}

pub async fn load_region(pool: &SqlitePool, id: Uuid) -> Result<Option<Region>> {
    let row = sqlx::query("SELECT id, name FROM regions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(Region::existing(id, row.get::<String, _>("name")))),
        None => Ok(None),
    }
}

/// Persist a region under its current identity
pub async fn create_region(pool: &SqlitePool, region: &Region) -> Result<()> {
    sqlx::query("INSERT INTO regions (id, name) VALUES (?, ?)")
        .bind(region.id.to_string())
        .bind(&region.name)
        .execute(pool)
        .await?;

    tracing::debug!(region_id = %region.id, name = %region.name, "Region created");
    Ok(())
}

/// Insert every name the store does not have yet, in one transaction
///
/// Returns the number of regions created.
pub async fn create_missing_regions(pool: &SqlitePool, names: &[String]) -> Result<usize> {
    let existing: HashSet<String> = load_all_regions(pool)
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let mut seen = HashSet::new();
    let mut tx = pool.begin().await?;
    let mut created = 0;

    for name in names {
        if existing.contains(name) || !seen.insert(name.as_str()) {
            continue;
        }
        let region = Region::transient(name.clone());
        sqlx::query("INSERT INTO regions (id, name) VALUES (?, ?)")
            .bind(region.id.to_string())
            .bind(&region.name)
            .execute(&mut *tx)
            .await?;
        created += 1;
    }

    tx.commit().await?;
    Ok(created)
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
    async fn test_create_then_load() {
        let pool = setup().await;
        let region = Region::transient("Республика Тыва");
        create_region(&pool, &region).await.unwrap();

        let loaded = load_all_regions(&pool).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, region.id);
        assert!(!loaded[0].is_new);
    }

    #[tokio::test]
    async fn test_create_missing_skips_known_and_repeated_names() {
        let pool = setup().await;
        create_region(&pool, &Region::transient("Город Москва")).await.unwrap();

        let names = vec![
            "Город Москва".to_string(),
            "Республика Тыва".to_string(),
            "Республика Тыва".to_string(),
            "Чукотский автономный округ".to_string(),
        ];
        assert_eq!(create_missing_regions(&pool, &names).await.unwrap(), 2);
        assert_eq!(load_all_regions(&pool).await.unwrap().len(), 3);
    }
}
