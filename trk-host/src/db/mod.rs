//! Database access for trk-host
//!
//! One SQLite file (`trk.db`) under the root folder holds the palette
//! documents and their snapshots. Job state is in memory only.

pub mod palettes;
pub mod retry;
pub mod snapshots;

use sqlx::SqlitePool;
use std::path::Path;
use trk_common::Result;

pub use retry::retry_on_lock;

/// Initialize database connection pool
///
/// Creates the file and the tables on first use.
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

/// Create palette tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS palettes (
            id TEXT PRIMARY KEY,
            doc TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS palette_snapshots (
            palette_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            doc TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (palette_id, ts)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_palettes_updated_at ON palettes(updated_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");
    Ok(())
}
