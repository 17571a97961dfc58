//! Corpus statistics and health overview.
//!
//! A quick summary of what's indexed: asset counts, embedding coverage,
//! access activity, collections, and (when a run name is given) the
//! state of that run's artifacts. This is the operator's audit surface
//! for the low-confidence and failure flow.

use anyhow::Result;

use crate::checkpoint::{self, RunState};
use crate::config::Config;
use crate::db;

pub async fn run_stats(config: &Config, run: Option<String>) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_assets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_assets")
        .fetch_one(&pool)
        .await?;

    let embedded_assets: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM media_assets WHERE embedding IS NOT NULL")
            .fetch_one(&pool)
            .await?;

    let low_confidence: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM media_assets WHERE description = ?")
            .bind(crate::generate::SENTINEL_DESCRIPTION)
            .fetch_one(&pool)
            .await?;

    let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_events")
        .fetch_one(&pool)
        .await?;

    let total_collections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("mediatrace — Corpus Stats");
    println!("=========================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Assets:         {}", total_assets);
    println!(
        "  Embedded:       {} / {} ({}%)",
        embedded_assets,
        total_assets,
        if total_assets > 0 {
            (embedded_assets * 100) / total_assets
        } else {
            0
        }
    );
    println!("  Low confidence: {}", low_confidence);
    println!("  Access events:  {}", total_events);
    println!("  Collections:    {}", total_collections);

    if let Some(run) = run {
        println!();
        println!("  Run '{}':", run);

        let list_path = config.data.list_path(&run);
        let listed = count_lines(&list_path);
        match listed {
            Some(n) => println!("    listed:       {}", n),
            None => println!("    listed:       (no list artifact)"),
        }

        let state = checkpoint::read_state(&config.data.checkpoint_path(&run))?;
        let state_display = match state {
            RunState::NotStarted => "not started".to_string(),
            RunState::InProgress(entry) => format!("in progress at {}", entry),
            RunState::Completed => "completed".to_string(),
        };
        println!("    checkpoint:   {}", state_display);

        let recorded = count_lines(&config.data.ledger_path(&run)).unwrap_or(0);
        println!("    recorded:     {}", recorded);

        let failures = count_lines(&config.data.failure_path(&run)).unwrap_or(0);
        println!("    failures:     {}", failures);
    }

    println!();

    pool.close().await;
    Ok(())
}

fn count_lines(path: &std::path::Path) -> Option<u64> {
    let content = std::fs::read_to_string(path).ok()?;
    Some(content.lines().filter(|l| !l.trim().is_empty()).count() as u64)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
