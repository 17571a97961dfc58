use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_on_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool. Idempotent.
pub async fn run_on_pool(pool: &SqlitePool) -> Result<()> {
    // Media assets: one row per indexed file, keyed by source path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            full_path TEXT NOT NULL UNIQUE,
            file_format TEXT NOT NULL,
            file_size_kb INTEGER NOT NULL,
            content_digest TEXT,
            meta TEXT,
            description TEXT NOT NULL,
            embedding BLOB,
            miniature BLOB,
            created_at INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            updated_at INTEGER,
            revision INTEGER NOT NULL DEFAULT 0,
            visited INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Access events: append-only history of views and exports
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS access_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            asset_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('view', 'export')),
            created_at INTEGER NOT NULL,
            FOREIGN KEY (asset_id) REFERENCES media_assets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Collections: curated asset sets; members is a JSON array column,
    // parsed into a set at the persistence edge
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            description TEXT,
            members TEXT NOT NULL DEFAULT '[]',
            cover_asset_id INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over asset descriptions
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='assets_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE assets_fts USING fts5(
                asset_id UNINDEXED,
                description
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_access_events_asset_id ON access_events(asset_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_assets_indexed_at ON media_assets(indexed_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
