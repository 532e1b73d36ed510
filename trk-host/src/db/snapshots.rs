//! Palette snapshot rows
//!
//! A snapshot is an immutable copy of a palette document keyed by
//! `(palette_id, ts)`. `ts` is RFC 3339 with microseconds in UTC, so text
//! order is time order.

use sqlx::{FromRow, SqlitePool};
use trk_common::Result;

#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub palette_id: String,
    pub ts: String,
    pub doc: String,
    pub created_at: String,
}

/// Insert a snapshot; `Ok(false)` when `(palette_id, ts)` is already taken
pub async fn insert(
    pool: &SqlitePool,
    palette_id: &str,
    ts: &str,
    doc: &str,
    now: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO palette_snapshots (palette_id, ts, doc, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(palette_id, ts) DO NOTHING
        "#,
    )
    .bind(palette_id)
    .bind(ts)
    .bind(doc)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch(pool: &SqlitePool, palette_id: &str, ts: &str) -> Result<Option<SnapshotRow>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT palette_id, ts, doc, created_at FROM palette_snapshots WHERE palette_id = ? AND ts = ?",
    )
    .bind(palette_id)
    .bind(ts)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn latest_ts(pool: &SqlitePool, palette_id: &str) -> Result<Option<String>> {
    let ts: Option<String> =
        sqlx::query_scalar("SELECT MAX(ts) FROM palette_snapshots WHERE palette_id = ?")
            .bind(palette_id)
            .fetch_one(pool)
            .await?;
    Ok(ts)
}

/// Snapshot timestamps of a palette, newest first
pub async fn list_ts(
    pool: &SqlitePool,
    palette_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<String>> {
    let rows: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT ts FROM palette_snapshots
        WHERE palette_id = ?
        ORDER BY ts DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(palette_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
