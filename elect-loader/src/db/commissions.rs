//! Commission database operations

use elect_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::Commission;

fn from_row(row: &SqliteRow) -> Result<Commission> {
    let id: String = row.get("id");
    let region_id: String = row.get("region_id");
    Ok(Commission {
        id: parse_uuid(&id)?,
        region_id: parse_uuid(&region_id)?,
        number: row.get("number"),
    })
}

pub async fn load_all_commissions(pool: &SqlitePool) -> Result<Vec<Commission>> {
    let rows = sqlx::query("SELECT id, region_id, number FROM commissions")
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}

/// Commissions of one region, ordered by number
pub async fn load_region_commissions(pool: &SqlitePool, region_id: Uuid) -> Result<Vec<Commission>> {
    let rows = sqlx::query(
        "SELECT id, region_id, number FROM commissions WHERE region_id = ? ORDER BY number",
    )
    .bind(region_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn create_commission(pool: &SqlitePool, region_id: Uuid, number: i32) -> Result<Commission> {
    let commission = Commission {
        id: Uuid::new_v4(),
        region_id,
        number,
    };

    sqlx::query("INSERT INTO commissions (id, region_id, number) VALUES (?, ?, ?)")
        .bind(commission.id.to_string())
        .bind(region_id.to_string())
        .bind(number)
        .execute(pool)
        .await?;

    tracing::debug!(commission_id = %commission.id, region_id = %region_id, number, "Commission created");
    Ok(commission)
}
