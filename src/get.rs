//! Asset retrieval by id, with access-history recording.
//!
//! Viewing an asset is itself an event: `run_get` appends a `view`
//! AccessEvent and bumps the visit counter before printing the record.
//! Events are history: appended once, never rewritten.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{AccessEvent, AccessKind, MediaAsset};

pub async fn get_asset(pool: &SqlitePool, id: i64) -> Result<MediaAsset> {
    let row = sqlx::query(
        r#"
        SELECT id, file_name, full_path, file_format, file_size_kb,
               content_digest, meta, description, created_at, indexed_at,
               updated_at, revision, visited
        FROM media_assets WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(row) => row,
        None => bail!("asset not found: {}", id),
    };

    Ok(MediaAsset {
        id: row.get("id"),
        file_name: row.get("file_name"),
        full_path: row.get("full_path"),
        file_format: row.get("file_format"),
        file_size_kb: row.get("file_size_kb"),
        content_digest: row.get("content_digest"),
        meta: row.get("meta"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        indexed_at: row.get("indexed_at"),
        updated_at: row.get("updated_at"),
        revision: row.get("revision"),
        visited: row.get("visited"),
    })
}

/// Append one immutable access event. A `view` also bumps the asset's
/// visit counter; revision is untouched by access.
pub async fn record_access(pool: &SqlitePool, asset_id: i64, kind: AccessKind) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO access_events (asset_id, kind, created_at) VALUES (?, ?, ?)")
        .bind(asset_id)
        .bind(kind.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

    if kind == AccessKind::View {
        sqlx::query("UPDATE media_assets SET visited = visited + 1 WHERE id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_events(pool: &SqlitePool, asset_id: i64) -> Result<Vec<AccessEvent>> {
    let rows = sqlx::query(
        "SELECT id, asset_id, kind, created_at FROM access_events \
         WHERE asset_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(asset_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let kind: String = row.get("kind");
            Some(AccessEvent {
                id: row.get("id"),
                asset_id: row.get("asset_id"),
                kind: AccessKind::parse(&kind)?,
                created_at: row.get("created_at"),
            })
        })
        .collect())
}

/// CLI entry point — prints the asset and records the view.
pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;

    let asset = match get_asset(&pool, id).await {
        Ok(asset) => asset,
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };
    record_access(&pool, id, AccessKind::View).await?;

    println!("--- Asset ---");
    println!("id:           {}", asset.id);
    println!("name:         {}", asset.file_name);
    println!("path:         {}", asset.full_path);
    println!("format:       {}", asset.file_format);
    println!("size:         {} KB", asset.file_size_kb);
    if let Some(ref digest) = asset.content_digest {
        println!("digest:       {}", digest);
    }
    println!("created_at:   {}", format_ts_iso(asset.created_at));
    println!("indexed_at:   {}", format_ts_iso(asset.indexed_at));
    if let Some(updated) = asset.updated_at {
        println!("updated_at:   {}", format_ts_iso(updated));
    }
    println!("revision:     {}", asset.revision);
    println!("visited:      {}", asset.visited);
    println!();

    if let Some(ref meta) = asset.meta {
        println!("--- Meta ---");
        println!("{}", meta);
        println!();
    }

    println!("--- Description ---");
    println!("{}", asset.description);

    pool.close().await;
    Ok(())
}

/// CLI entry point — prints the asset's access history, newest first.
pub async fn run_history(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;

    // Surface a proper error for unknown ids instead of an empty list
    let asset = match get_asset(&pool, id).await {
        Ok(asset) => asset,
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };
    let events = list_events(&pool, id).await?;

    println!("--- History for {} ({}) ---", asset.file_name, asset.id);
    if events.is_empty() {
        println!("(no access recorded)");
    }
    for event in &events {
        println!("{}  {}", format_ts_iso(event.created_at), event.kind.as_str());
    }

    pool.close().await;
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
