//! Palette rows
//!
//! Documents are stored as JSON text next to their version counter. The
//! conditional update is a single `UPDATE ... WHERE version = ?`, so the
//! version check and the write cannot be separated by another writer.

use sqlx::{FromRow, SqlitePool};
use trk_common::Result;

#[derive(Debug, Clone, FromRow)]
pub struct PaletteRow {
    pub id: String,
    pub doc: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub async fn insert(
    pool: &SqlitePool,
    id: &str,
    doc: &str,
    version: i64,
    now: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO palettes (id, doc, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(doc)
    .bind(version)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch(pool: &SqlitePool, id: &str) -> Result<Option<PaletteRow>> {
    let row = sqlx::query_as::<_, PaletteRow>(
        "SELECT id, doc, version, created_at, updated_at FROM palettes WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM palettes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Write `doc` only if the stored version is still `expected`
///
/// Returns the number of rows changed: 0 means the row is gone or its
/// version moved on.
pub async fn update_if_version(
    pool: &SqlitePool,
    id: &str,
    doc: &str,
    expected: i64,
    now: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE palettes SET doc = ?, version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
    )
    .bind(doc)
    .bind(now)
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Delete a palette and its snapshots in one transaction
pub async fn delete(pool: &SqlitePool, id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM palette_snapshots WHERE palette_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM palettes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Most recently updated first
pub async fn list(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<PaletteRow>> {
    let rows = sqlx::query_as::<_, PaletteRow>(
        r#"
        SELECT id, doc, version, created_at, updated_at
        FROM palettes
        ORDER BY updated_at DESC, id ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM palettes")
        .fetch_one(pool)
        .await?;
    Ok(total)
}
