//! Ingestion upserts and output-ledger replay.
//!
//! The upserter is the single write path for assets. It is one atomic
//! `INSERT ... ON CONFLICT ... RETURNING` statement keyed on the unique
//! source path, so two runs racing on the same key cannot duplicate a row
//! or lose a revision; there is deliberately no read-then-write anywhere.
//!
//! `run_ingest` replays an existing output ledger (`.jsonl`) into the
//! store, embedding records that arrived without a vector. Re-running it
//! over the same ledger touches revisions but never creates duplicates.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::io::BufRead;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::AssetRecord;

/// Atomically insert or update the asset identified by `record.full_path`.
/// Returns the asset id.
///
/// First sight creates the row with revision 0; every later sight of the
/// same path bumps the revision, whether or not the content digest
/// changed. A record without an embedding keeps whatever vector the row
/// already had, so one failed embed run cannot revoke vector eligibility.
pub async fn upsert_asset(pool: &SqlitePool, record: &AssetRecord) -> Result<i64> {
    let (meta, content) = split_description(&record.description);
    let embedding_blob = record.embedding.as_deref().map(embedding::vec_to_blob);
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    let asset_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO media_assets (
            file_name, full_path, file_format, file_size_kb,
            content_digest, meta, description, embedding,
            created_at, indexed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(full_path) DO UPDATE SET
            file_name = excluded.file_name,
            file_format = excluded.file_format,
            file_size_kb = excluded.file_size_kb,
            content_digest = excluded.content_digest,
            meta = excluded.meta,
            description = excluded.description,
            embedding = COALESCE(excluded.embedding, media_assets.embedding),
            updated_at = excluded.indexed_at,
            revision = media_assets.revision + 1
        RETURNING id
        "#,
    )
    .bind(&record.image_name)
    .bind(&record.full_path)
    .bind(record.file_format.to_uppercase())
    .bind(record.file_size_kb)
    .bind(&record.content_digest)
    .bind(&meta)
    .bind(&content)
    .bind(&embedding_blob)
    .bind(record.created_at.timestamp())
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .with_context(|| format!("Upsert failed for {}", record.full_path))?;

    // Replace the FTS mirror row for this asset
    sqlx::query("DELETE FROM assets_fts WHERE asset_id = ?")
        .bind(asset_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO assets_fts (asset_id, description) VALUES (?, ?)")
        .bind(asset_id)
        .bind(&content)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(asset_id)
}

/// Split a description into structured meta notes and body content.
///
/// The segment before the first blank line is meta when a blank line is
/// present; otherwise the whole text is content.
pub fn split_description(description: &str) -> (Option<String>, String) {
    match description.split_once("\n\n") {
        Some((meta, content)) if !meta.trim().is_empty() && !content.trim().is_empty() => (
            Some(meta.trim().to_string()),
            content.trim().to_string(),
        ),
        _ => (None, description.trim().to_string()),
    }
}

/// Replay the named run's output ledger into the store.
pub async fn run_ingest(config: &Config, run: &str) -> Result<()> {
    let ledger_path = config.data.ledger_path(run);
    let file = std::fs::File::open(&ledger_path)
        .with_context(|| format!("Missing output ledger: {}", ledger_path.display()))?;

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;

    let mut upserted = 0u64;
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut record: AssetRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed ledger line");
                failed += 1;
                continue;
            }
        };

        if record.embedding.is_none() && config.embedding.is_enabled() {
            let (_, content) = split_description(&record.description);
            match embedding::embed_query(provider.as_ref(), &config.embedding, &content).await {
                Ok(vector) => {
                    record.embedding = Some(vector);
                    embedded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %record.full_path, error = %e, "embedding failed during replay");
                }
            }
        }

        match upsert_asset(&pool, &record).await {
            Ok(_) => upserted += 1,
            Err(e) => {
                tracing::warn!(path = %record.full_path, error = %e, "upsert failed during replay");
                failed += 1;
            }
        }
    }

    println!("ingest {}", run);
    println!("  upserted: {}", upserted);
    if config.embedding.is_enabled() {
        println!("  embedded: {}", embedded);
    }
    println!("  failed: {}", failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
