//! Protocol database operations
//!
//! A protocol is written as one header row, one row per candidate result and
//! one row per image, all inside a single transaction.

use elect_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{
    Candidate, Protocol, ProtocolRecord, ProtocolResult, StoredImage, SUMMARY_VALUES,
};

/// Header columns holding the summary values, in record order
pub const SUMMARY_COLUMNS: [&str; SUMMARY_VALUES] = [
    "value_01", "value_02", "value_03", "value_04", "value_05", "value_06", "value_07",
    "value_08", "value_09", "value_10", "value_11", "value_12", "value_13", "value_14",
    "value_15", "value_16", "value_17", "value_18",
];

fn header_columns() -> String {
    SUMMARY_COLUMNS.join(", ")
}

/// Find the protocol a provider stored for a commission of a region
pub async fn find_protocol(
    pool: &SqlitePool,
    provider_id: Uuid,
    region_id: Uuid,
    commission_number: i32,
) -> Result<Option<Protocol>> {
    let sql = format!(
        r#"
        SELECT p.id, p.provider_id, p.commission_id, {}
        FROM protocols p
        JOIN commissions c ON c.id = p.commission_id
        WHERE p.provider_id = ? AND c.region_id = ? AND c.number = ?
        "#,
        SUMMARY_COLUMNS
            .iter()
            .map(|c| format!("p.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let row = sqlx::query(&sql)
        .bind(provider_id.to_string())
        .bind(region_id.to_string())
        .bind(commission_number)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(load_protocol(pool, &row).await?)),
        None => Ok(None),
    }
}

/// Every protocol stored for a commission, across providers
pub async fn load_commission_protocols(pool: &SqlitePool, commission_id: Uuid) -> Result<Vec<Protocol>> {
    let sql = format!(
        "SELECT id, provider_id, commission_id, {} FROM protocols WHERE commission_id = ?",
        header_columns()
    );
    let rows = sqlx::query(&sql)
        .bind(commission_id.to_string())
        .fetch_all(pool)
        .await?;

    let mut protocols = Vec::with_capacity(rows.len());
    for row in &rows {
        protocols.push(load_protocol(pool, row).await?);
    }
    Ok(protocols)
}

async fn load_protocol(pool: &SqlitePool, row: &SqliteRow) -> Result<Protocol> {
    let id = parse_uuid(&row.get::<String, _>("id"))?;
    let summary = SUMMARY_COLUMNS
        .iter()
        .map(|c| row.get::<i32, _>(*c))
        .collect();

    let result_rows = sqlx::query(
        "SELECT candidate_id, value, idx FROM protocol_results WHERE protocol_id = ? ORDER BY idx",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(result_rows.len());
    for r in &result_rows {
        results.push(ProtocolResult {
            candidate_id: parse_uuid(&r.get::<String, _>("candidate_id"))?,
            value: r.get("value"),
            index: r.get("idx"),
        });
    }

    let images = sqlx::query(
        r#"
        SELECT uri, image IS NOT NULL AS has_bytes, idx
        FROM protocol_images WHERE protocol_id = ? ORDER BY idx
        "#,
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| StoredImage {
        uri: r.get("uri"),
        has_bytes: r.get::<i64, _>("has_bytes") != 0,
        index: r.get("idx"),
    })
    .collect();

    Ok(Protocol {
        id,
        provider_id: parse_uuid(&row.get::<String, _>("provider_id"))?,
        commission_id: parse_uuid(&row.get::<String, _>("commission_id"))?,
        summary,
        results,
        images,
    })
}

/// Insert a new protocol with its result and image rows
///
/// Returns the number of image rows written.
pub async fn insert_protocol(
    pool: &SqlitePool,
    provider_id: Uuid,
    commission_id: Uuid,
    record: &ProtocolRecord,
    candidates: &[Candidate],
) -> Result<(Uuid, usize)> {
    let protocol_id = Uuid::new_v4();
    let placeholders = vec!["?"; SUMMARY_VALUES].join(", ");
    let sql = format!(
        "INSERT INTO protocols (id, provider_id, commission_id, {}) VALUES (?, ?, ?, {})",
        header_columns(),
        placeholders
    );

    let mut tx = pool.begin().await?;

    let mut query = sqlx::query(&sql)
        .bind(protocol_id.to_string())
        .bind(provider_id.to_string())
        .bind(commission_id.to_string());
    for value in record.summary_values() {
        query = query.bind(*value);
    }
    query.execute(&mut *tx).await?;

    let images = insert_children(&mut *tx, protocol_id, record, candidates).await?;

    tx.commit().await?;
    Ok((protocol_id, images))
}

/// Overwrite a stored protocol in place, keeping its identity
///
/// Returns the number of image rows written.
pub async fn replace_protocol(
    pool: &SqlitePool,
    protocol_id: Uuid,
    record: &ProtocolRecord,
    candidates: &[Candidate],
) -> Result<usize> {
    let assignments = SUMMARY_COLUMNS
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE protocols SET {} WHERE id = ?", assignments);

    let mut tx = pool.begin().await?;

    let mut query = sqlx::query(&sql);
    for value in record.summary_values() {
        query = query.bind(*value);
    }
    query.bind(protocol_id.to_string()).execute(&mut *tx).await?;

    sqlx::query("DELETE FROM protocol_results WHERE protocol_id = ?")
        .bind(protocol_id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM protocol_images WHERE protocol_id = ?")
        .bind(protocol_id.to_string())
        .execute(&mut *tx)
        .await?;

    let images = insert_children(&mut *tx, protocol_id, record, candidates).await?;

    tx.commit().await?;
    Ok(images)
}

async fn insert_children(
    conn: &mut SqliteConnection,
    protocol_id: Uuid,
    record: &ProtocolRecord,
    candidates: &[Candidate],
) -> Result<usize> {
    for (index, value) in record.candidate_values().iter().enumerate() {
        let candidate = candidates.get(index).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Poll has {} candidates, result #{} has no candidate",
                candidates.len(),
                index
            ))
        })?;

        sqlx::query(
            "INSERT INTO protocol_results (id, protocol_id, candidate_id, value, idx) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(protocol_id.to_string())
        .bind(candidate.id.to_string())
        .bind(*value)
        .bind(index as i32)
        .execute(&mut *conn)
        .await?;
    }

    let mut written = 0;
    for image in record.images.iter().filter(|i| !i.is_empty()) {
        sqlx::query(
            "INSERT INTO protocol_images (id, protocol_id, uri, image, idx) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(protocol_id.to_string())
        .bind(image.uri.as_deref())
        .bind(image.bytes.as_deref())
        .bind(written as i32)
        .execute(&mut *conn)
        .await?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{commissions, polls, providers, regions};
    use crate::models::{PollDefinition, ProtocolImage, Region, RECORD_VALUES};
    use sqlx::sqlite::SqlitePoolOptions;

    struct Fixture {
        pool: SqlitePool,
        region: Region,
        commission_id: Uuid,
        provider_id: Uuid,
        candidates: Vec<Candidate>,
    }

    async fn setup() -> Fixture {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();

        let poll = polls::ensure_poll_exists(&pool, &PollDefinition::default()).await.unwrap();
        let provider = providers::create_provider(&pool, "ruelect.csv", true, poll.id).await.unwrap();
        let region = Region::transient("Республика Тыва");
        regions::create_region(&pool, &region).await.unwrap();
        let commission = commissions::create_commission(&pool, region.id, 1).await.unwrap();

        Fixture {
            pool,
            region,
            commission_id: commission.id,
            provider_id: provider.id,
            candidates: poll.candidates,
        }
    }

    fn record(region: &Region, images: Vec<ProtocolImage>) -> ProtocolRecord {
        let mut values = [0; RECORD_VALUES];
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as i32 * 10;
        }
        ProtocolRecord {
            region: region.clone(),
            commission: 1,
            values,
            images,
        }
    }

    #[tokio::test]
    async fn test_insert_writes_header_results_and_images() {
        let f = setup().await;
        let rec = record(
            &f.region,
            vec![
                ProtocolImage::from_uri("http://a/1.jpg", 0),
                ProtocolImage::default(),
                ProtocolImage {
                    uri: None,
                    bytes: Some(vec![1, 2, 3]),
                    index: 2,
                },
            ],
        );

        let (_, images) = insert_protocol(&f.pool, f.provider_id, f.commission_id, &rec, &f.candidates)
            .await
            .unwrap();
        assert_eq!(images, 2);

        let stored = find_protocol(&f.pool, f.provider_id, f.region.id, 1)
            .await
            .unwrap()
            .expect("protocol stored");
        assert_eq!(stored.summary, rec.summary_values().to_vec());
        assert_eq!(stored.results.len(), 7);
        assert_eq!(
            stored.results.iter().map(|r| r.index).collect::<Vec<_>>(),
            (0..7).collect::<Vec<_>>()
        );
        assert_eq!(stored.images.len(), 2);
        assert_eq!(stored.images[1].index, 1);
        assert!(stored.images[1].has_bytes);
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let f = setup().await;
        let rec = record(&f.region, vec![ProtocolImage::from_uri("http://a/1.jpg", 0)]);
        let (id, _) = insert_protocol(&f.pool, f.provider_id, f.commission_id, &rec, &f.candidates)
            .await
            .unwrap();

        let mut changed = rec.clone();
        changed.values[0] = 4242;
        changed.images.clear();
        replace_protocol(&f.pool, id, &changed, &f.candidates).await.unwrap();

        let stored = find_protocol(&f.pool, f.provider_id, f.region.id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.summary[0], 4242);
        assert!(stored.images.is_empty());
        assert!(stored.matches(&changed));
    }

    #[tokio::test]
    async fn test_second_insert_for_same_pair_rejected() {
        let f = setup().await;
        let rec = record(&f.region, Vec::new());
        insert_protocol(&f.pool, f.provider_id, f.commission_id, &rec, &f.candidates)
            .await
            .unwrap();

        let again = insert_protocol(&f.pool, f.provider_id, f.commission_id, &rec, &f.candidates).await;
        assert!(again.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM protocol_results")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count, 7);
    }
}
