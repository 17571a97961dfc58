//! Safe path staging for the external generator.
//!
//! The generator CLI takes a file path as an argument and cannot be relied
//! on to accept non-ASCII paths. Pure 7-bit-ASCII paths pass through
//! untouched; anything else is copied to a fixed temp filename (keeping the
//! extension) and the temp copy is removed when the guard drops, whatever
//! happened in between. The asset's recorded identity always stays the
//! original path.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Guard over the path handed to the generator. Dropping it removes the
/// staged temp copy, if one was made.
pub struct StagedPath {
    path: PathBuf,
    staged: bool,
}

impl StagedPath {
    /// Stage `original` for the generator.
    pub fn acquire(original: &Path) -> Result<StagedPath> {
        let as_str = original.to_string_lossy();
        if as_str.is_ascii() {
            return Ok(StagedPath {
                path: original.to_path_buf(),
                staged: false,
            });
        }

        let ext = original
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let temp_path = std::env::temp_dir().join(format!("mediatrace.{ext}"));

        std::fs::copy(original, &temp_path).with_context(|| {
            format!(
                "Failed to stage {} to {}",
                original.display(),
                temp_path.display()
            )
        })?;

        Ok(StagedPath {
            path: temp_path,
            staged: true,
        })
    }

    /// Path to hand to the generator.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn is_staged(&self) -> bool {
        self.staged
    }
}

impl Drop for StagedPath {
    fn drop(&mut self) {
        if self.staged && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_ascii_path_passes_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        let original = tmp.path().join("plain.jpg");
        fs::write(&original, b"bytes").unwrap();

        let staged = StagedPath::acquire(&original).unwrap();
        assert!(!staged.is_staged());
        assert_eq!(staged.as_path(), original.as_path());
    }

    #[test]
    fn test_non_ascii_path_is_copied_and_cleaned() {
        let tmp = tempfile::TempDir::new().unwrap();
        let original = tmp.path().join("照片.jpg");
        fs::write(&original, b"bytes").unwrap();

        let temp_location;
        {
            let staged = StagedPath::acquire(&original).unwrap();
            assert!(staged.is_staged());
            assert_ne!(staged.as_path(), original.as_path());
            assert!(staged.as_path().to_string_lossy().is_ascii());
            assert_eq!(fs::read(staged.as_path()).unwrap(), b"bytes");
            temp_location = staged.as_path().to_path_buf();
        }

        // Guard dropped: temp copy gone, original untouched
        assert!(!temp_location.exists());
        assert!(original.exists());
    }

    #[test]
    fn test_cleanup_runs_on_unwind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let original = tmp.path().join("фото.png");
        fs::write(&original, b"bytes").unwrap();

        let temp_location = std::sync::Arc::new(std::sync::Mutex::new(None));
        let slot = temp_location.clone();
        let path = original.clone();

        let result = std::panic::catch_unwind(move || {
            let staged = StagedPath::acquire(&path).unwrap();
            *slot.lock().unwrap() = Some(staged.as_path().to_path_buf());
            panic!("generator blew up");
        });

        assert!(result.is_err());
        let temp = temp_location.lock().unwrap().clone().unwrap();
        assert!(!temp.exists(), "staged copy must be removed on unwind");
    }

    #[test]
    fn test_staged_keeps_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let original = tmp.path().join("übersicht.webp");
        fs::write(&original, b"bytes").unwrap();

        let staged = StagedPath::acquire(&original).unwrap();
        assert_eq!(
            staged.as_path().extension().and_then(|e| e.to_str()),
            Some("webp")
        );
    }
}
