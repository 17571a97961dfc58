//! Checkpoint artifact for resumable runs.
//!
//! The checkpoint is a plain-text file beside the list artifact. Its three
//! observable states drive the runner's state machine:
//!
//! - absent        → the run has never started
//! - one line      → the run was interrupted while that entry was in flight
//! - empty         → the run completed
//!
//! Checkpoint writes are flushed to disk before the corresponding item is
//! processed; a crash therefore resumes by reprocessing exactly the item
//! that was in flight, never by skipping it.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    InProgress(String),
    Completed,
}

/// Resolve the run state from the checkpoint artifact.
pub fn read_state(path: &Path) -> Result<RunState> {
    if !path.exists() {
        return Ok(RunState::NotStarted);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let entry = content.trim();

    if entry.is_empty() {
        Ok(RunState::Completed)
    } else {
        Ok(RunState::InProgress(entry.to_string()))
    }
}

/// Record `entry` as in flight. Durable: returns only after the bytes are
/// synced to disk.
pub fn write_checkpoint(path: &Path, entry: &str) -> Result<()> {
    write_durable(path, entry)
}

/// Truncate the checkpoint to empty, marking the run completed.
pub fn mark_completed(path: &Path) -> Result<()> {
    write_durable(path, "")
}

fn write_durable(path: &Path, content: &str) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
        .with_context(|| format!("Failed to sync checkpoint {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_not_started() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.sav");
        assert_eq!(read_state(&path).unwrap(), RunState::NotStarted);
    }

    #[test]
    fn test_entry_is_in_progress() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.sav");
        write_checkpoint(&path, "/photos/b.jpg").unwrap();
        assert_eq!(
            read_state(&path).unwrap(),
            RunState::InProgress("/photos/b.jpg".to_string())
        );
    }

    #[test]
    fn test_empty_is_completed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.sav");
        write_checkpoint(&path, "/photos/b.jpg").unwrap();
        mark_completed(&path).unwrap();
        assert_eq!(read_state(&path).unwrap(), RunState::Completed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_checkpoint_overwrites_previous_entry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.sav");
        write_checkpoint(&path, "/photos/a.jpg").unwrap();
        write_checkpoint(&path, "/photos/b.jpg").unwrap();
        assert_eq!(
            read_state(&path).unwrap(),
            RunState::InProgress("/photos/b.jpg".to_string())
        );
    }

    #[test]
    fn test_whitespace_only_counts_as_completed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.sav");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(read_state(&path).unwrap(), RunState::Completed);
    }
}
