//! Resumable batch processing.
//!
//! Drives the per-item pipeline over a list artifact: stage the path for
//! the generator, describe, embed, hash, append to the output ledger, and
//! upsert into the store. A checkpoint is durably written before each item
//! begins, so a crash resumes by reprocessing exactly the item that was in
//! flight; the atomic upsert absorbs the resulting at-least-once replay.
//!
//! One item's failure never aborts the run; it lands in the failure
//! ledger and processing continues. Only two conditions are fatal: the
//! list artifact is missing, or the checkpoint entry no longer appears in
//! the list (the source tree changed between runs).

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::{self, RunState};
use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::generate::{
    self, CliGenerator, DescriptionGenerator, SENTINEL_DESCRIPTION,
};
use crate::hash;
use crate::ingest;
use crate::models::AssetRecord;
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::stage::StagedPath;

/// Fatal run-level errors. Everything else is per-item and non-fatal.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Missing list artifact: {0}")]
    MissingList(PathBuf),
    /// The checkpoint names an entry the current list does not contain.
    /// The list and checkpoint are assumed mutually consistent; this is
    /// surfaced to the operator instead of silently restarting from zero.
    #[error("Checkpoint entry not found in list: \"{0}\"")]
    ResumeMismatch(String),
}

/// On-disk artifacts of one run.
pub struct RunArtifacts {
    pub list: PathBuf,
    pub checkpoint: PathBuf,
    pub ledger: PathBuf,
    pub failures: PathBuf,
}

impl RunArtifacts {
    pub fn for_run(config: &Config, run: &str) -> Self {
        Self {
            list: config.data.list_path(run),
            checkpoint: config.data.checkpoint_path(run),
            ledger: config.data.ledger_path(run),
            failures: config.data.failure_path(run),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub low_confidence: u64,
    pub failed: u64,
    pub already_complete: bool,
}

/// CLI entry point for `mtrace process`.
pub async fn run_process(
    config: &Config,
    run: &str,
    progress: &dyn RunProgressReporter,
) -> Result<()> {
    let generator_config = config
        .generator
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No [generator] configured; cannot process"))?;
    let generator = CliGenerator::new(generator_config);

    let pool = db::connect(config).await?;
    let artifacts = RunArtifacts::for_run(config, run);

    let outcome = run_batch(
        run,
        &artifacts,
        &generator,
        &config.embedding,
        &pool,
        progress,
    )
    .await;
    pool.close().await;
    let outcome = outcome?;

    if outcome.already_complete {
        println!("process {} — already complete", run);
        return Ok(());
    }

    println!("process {}", run);
    println!("  items listed: {}", outcome.total);
    println!("  processed: {}", outcome.processed);
    println!("  succeeded: {}", outcome.succeeded);
    println!("  low confidence: {}", outcome.low_confidence);
    println!("  failed: {}", outcome.failed);
    println!("  ledger: {}", artifacts.ledger.display());
    println!("  failures: {}", artifacts.failures.display());
    println!("ok");
    Ok(())
}

/// Run the batch pipeline over the list artifact. Strictly sequential:
/// one generator invocation in flight at any time.
pub async fn run_batch(
    run: &str,
    artifacts: &RunArtifacts,
    generator: &dyn DescriptionGenerator,
    embedding_config: &EmbeddingConfig,
    pool: &SqlitePool,
    progress: &dyn RunProgressReporter,
) -> Result<RunOutcome> {
    if !artifacts.list.exists() {
        return Err(RunError::MissingList(artifacts.list.clone()).into());
    }
    let entries = read_list(&artifacts.list)?;

    let start_index = match checkpoint::read_state(&artifacts.checkpoint)? {
        RunState::Completed => {
            return Ok(RunOutcome {
                total: entries.len() as u64,
                already_complete: true,
                ..Default::default()
            });
        }
        RunState::NotStarted => 0,
        RunState::InProgress(ref entry) => entries
            .iter()
            .position(|line| line == entry)
            .ok_or_else(|| RunError::ResumeMismatch(entry.clone()))?,
    };

    if start_index > 0 {
        progress.report(RunProgressEvent::Resuming {
            run: run.to_string(),
            index: start_index as u64,
            total: entries.len() as u64,
        });
    }

    let provider = embedding::create_provider(embedding_config)?;
    let mut ledger = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&artifacts.ledger)
        .with_context(|| format!("Failed to open ledger {}", artifacts.ledger.display()))?;

    let mut outcome = RunOutcome {
        total: entries.len() as u64,
        ..Default::default()
    };

    for (index, entry) in entries.iter().enumerate().skip(start_index) {
        // Durable before any work: a crash from here on resumes at this item
        checkpoint::write_checkpoint(&artifacts.checkpoint, entry)?;
        progress.report(RunProgressEvent::Processing {
            run: run.to_string(),
            n: (index + 1) as u64,
            total: entries.len() as u64,
            current: entry.clone(),
        });

        outcome.processed += 1;
        match process_item(entry, generator, embedding_config, provider.as_ref()).await {
            Ok(item) => {
                if !item.confident {
                    outcome.low_confidence += 1;
                    append_line(&artifacts.failures, entry)?;
                } else if item.embed_failed {
                    append_line(&artifacts.failures, entry)?;
                }

                let line = serde_json::to_string(&item.record)?;
                writeln!(ledger, "{}", line)?;
                ledger.flush()?;

                ingest::upsert_asset(pool, &item.record).await?;
                outcome.succeeded += 1;
            }
            Err(e) => {
                tracing::warn!(path = %entry, error = %e, "item failed; continuing");
                append_line(&artifacts.failures, entry)?;
                outcome.failed += 1;
            }
        }
    }

    // Empty checkpoint marks the run complete
    checkpoint::mark_completed(&artifacts.checkpoint)?;
    Ok(outcome)
}

struct ProcessedItem {
    record: AssetRecord,
    confident: bool,
    embed_failed: bool,
}

/// Stage → describe → validate → embed → hash → build the ledger record.
/// Any error here is a per-item failure handled by the caller.
async fn process_item(
    entry: &str,
    generator: &dyn DescriptionGenerator,
    embedding_config: &EmbeddingConfig,
    provider: &dyn EmbeddingProvider,
) -> Result<ProcessedItem> {
    let original = Path::new(entry);

    let description = {
        let staged = StagedPath::acquire(original)?;
        generator.describe(staged.as_path()).await?
        // staged temp copy removed here, success or not
    };

    let confident = generate::is_confident(&description);
    let description = if confident {
        description
    } else {
        SENTINEL_DESCRIPTION.to_string()
    };

    // Embedding is inline but non-fatal: a record without a vector stays
    // lexically searchable and keeps any vector a prior run stored.
    let mut embed_failed = false;
    let embedding_vec = if confident && embedding_config.is_enabled() {
        match embedding::embed_query(provider, embedding_config, &description).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(path = %entry, error = %e, "embedding failed");
                embed_failed = true;
                None
            }
        }
    } else {
        None
    };

    // Hash and stat the original, not the staged copy: identity always
    // belongs to the source path.
    let content_digest = hash::digest_file(original)?;
    let metadata = std::fs::metadata(original)
        .with_context(|| format!("Failed to stat {}", original.display()))?;
    let created = metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

    let record = AssetRecord {
        image_name: original
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.to_string()),
        full_path: entry.to_string(),
        file_format: original
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string(),
        file_size_kb: ((metadata.len() as f64) / 1024.0).round() as i64,
        created_at: created.into(),
        description,
        content_digest: Some(content_digest),
        embedding: embedding_vec,
    };

    Ok(ProcessedItem {
        record,
        confident,
        embed_failed,
    })
}

fn read_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read list artifact {}", path.display()))?;
    Ok(content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;

    struct FixedGenerator(String);

    #[async_trait]
    impl DescriptionGenerator for FixedGenerator {
        async fn describe(&self, _image: &Path) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl DescriptionGenerator for FailingGenerator {
        async fn describe(&self, image: &Path) -> Result<String> {
            anyhow::bail!("generator refused {}", image.display())
        }
    }

    fn confident_text() -> String {
        format!("[START] {}", "a detailed scene description ".repeat(8))
    }

    /// Tempdir with `count` jpg files and the artifact paths for one run.
    fn setup_run(count: usize) -> (tempfile::TempDir, RunArtifacts, Vec<String>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut entries = Vec::new();
        for i in 0..count {
            let path = tmp.path().join(format!("img{:02}.jpg", i));
            std::fs::write(&path, format!("bytes-{}", i)).unwrap();
            entries.push(crate::scan::normalize_path(&path.to_string_lossy()));
        }

        let artifacts = RunArtifacts {
            list: tmp.path().join("run.lst"),
            checkpoint: tmp.path().join("run.sav"),
            ledger: tmp.path().join("run.jsonl"),
            failures: tmp.path().join("run.fail.lst"),
        };
        std::fs::write(&artifacts.list, entries.join("\n") + "\n").unwrap();

        (tmp, artifacts, entries)
    }

    fn ledger_lines(artifacts: &RunArtifacts) -> Vec<String> {
        std::fs::read_to_string(&artifacts.ledger)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_run_processes_all_and_completes() {
        let (_tmp, artifacts, _entries) = setup_run(3);
        let pool = db::connect_memory().await.unwrap();
        let generator = FixedGenerator(confident_text());

        let outcome = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.succeeded, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(ledger_lines(&artifacts).len(), 3);

        // Completion marker: checkpoint exists and is empty
        assert_eq!(std::fs::read_to_string(&artifacts.checkpoint).unwrap(), "");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_assets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_resume_starts_exactly_at_checkpoint() {
        let (_tmp, artifacts, entries) = setup_run(4);
        let pool = db::connect_memory().await.unwrap();

        // A was already processed and recorded; the crash happened on B
        std::fs::write(&artifacts.ledger, "{\"already\":\"recorded\"}\n").unwrap();
        std::fs::write(&artifacts.checkpoint, &entries[1]).unwrap();

        let generator = FixedGenerator(confident_text());
        let outcome = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();

        // B, C, D reprocessed; A's record untouched, not re-appended
        assert_eq!(outcome.processed, 3);
        let lines = ledger_lines(&artifacts);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "{\"already\":\"recorded\"}");
        assert!(lines[1].contains(&entries[1]));

        assert_eq!(std::fs::read_to_string(&artifacts.checkpoint).unwrap(), "");
    }

    #[tokio::test]
    async fn test_completed_checkpoint_processes_nothing() {
        let (_tmp, artifacts, _entries) = setup_run(2);
        let pool = db::connect_memory().await.unwrap();
        std::fs::write(&artifacts.checkpoint, "").unwrap();

        let generator = FixedGenerator(confident_text());
        let outcome = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();

        assert!(outcome.already_complete);
        assert_eq!(outcome.processed, 0);
        assert!(ledger_lines(&artifacts).is_empty());
    }

    #[tokio::test]
    async fn test_resume_mismatch_aborts_before_any_item() {
        let (_tmp, artifacts, _entries) = setup_run(3);
        let pool = db::connect_memory().await.unwrap();
        std::fs::write(&artifacts.checkpoint, "/not/in/list.jpg").unwrap();

        let generator = FixedGenerator(confident_text());
        let err = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap_err();

        match err.downcast_ref::<RunError>() {
            Some(RunError::ResumeMismatch(entry)) => {
                assert_eq!(entry, "/not/in/list.jpg")
            }
            other => panic!("expected ResumeMismatch, got {:?}", other),
        }

        // No item was touched
        assert!(ledger_lines(&artifacts).is_empty());
        assert!(!artifacts.failures.exists());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_assets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_missing_list_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let artifacts = RunArtifacts {
            list: tmp.path().join("absent.lst"),
            checkpoint: tmp.path().join("absent.sav"),
            ledger: tmp.path().join("absent.jsonl"),
            failures: tmp.path().join("absent.fail.lst"),
        };
        let pool = db::connect_memory().await.unwrap();

        let generator = FixedGenerator(confident_text());
        let err = run_batch(
            "absent",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::MissingList(_))
        ));
    }

    #[tokio::test]
    async fn test_low_confidence_gets_sentinel_but_is_ingested() {
        let (_tmp, artifacts, entries) = setup_run(1);
        let pool = db::connect_memory().await.unwrap();

        let generator = FixedGenerator("[START] too short".to_string());
        let outcome = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.low_confidence, 1);
        assert_eq!(outcome.succeeded, 1);

        // Sentinel in the ledger and the store; path in the failure ledger
        assert!(ledger_lines(&artifacts)[0].contains("FAILED TO GENERATE"));
        let stored: String = sqlx::query_scalar("SELECT description FROM media_assets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, SENTINEL_DESCRIPTION);

        let failures = std::fs::read_to_string(&artifacts.failures).unwrap();
        assert!(failures.contains(&entries[0]));
    }

    #[tokio::test]
    async fn test_item_failure_never_aborts_the_run() {
        let (_tmp, artifacts, entries) = setup_run(3);
        let pool = db::connect_memory().await.unwrap();

        let outcome = run_batch(
            "run",
            &artifacts,
            &FailingGenerator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.succeeded, 0);

        let failures = std::fs::read_to_string(&artifacts.failures).unwrap();
        for entry in &entries {
            assert!(failures.contains(entry));
        }

        // The run still completed
        assert_eq!(std::fs::read_to_string(&artifacts.checkpoint).unwrap(), "");
    }

    #[tokio::test]
    async fn test_rerun_after_completion_is_a_no_op() {
        let (_tmp, artifacts, _entries) = setup_run(2);
        let pool = db::connect_memory().await.unwrap();
        let generator = FixedGenerator(confident_text());

        let first = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(first.succeeded, 2);

        let second = run_batch(
            "run",
            &artifacts,
            &generator,
            &EmbeddingConfig::default(),
            &pool,
            &NoProgress,
        )
        .await
        .unwrap();
        assert!(second.already_complete);
        assert_eq!(ledger_lines(&artifacts).len(), 2);
    }
}
