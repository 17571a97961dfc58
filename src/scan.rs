//! Crawl enumerator.
//!
//! Walks a media directory depth-first and writes every matching file path
//! to the run's list artifact, one `/`-separated path per line. The walk
//! order is sorted per directory, so an unchanged tree always produces an
//! identical list; downstream resume logic depends on that.

use anyhow::{bail, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;

/// Extensions eligible for indexing. Matched case-insensitively.
const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tiff"];

pub struct ScanSummary {
    pub files: u64,
    pub directories: u64,
}

/// CLI entry point: scan `root` and write `<data_dir>/<run>.lst`.
pub fn run_scan(config: &Config, root: &Path, run_override: Option<String>) -> Result<()> {
    if !root.exists() {
        bail!("Scan root does not exist: {}", root.display());
    }

    let run = match run_override {
        Some(name) => name,
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive run name from {}", root.display()))?,
    };

    std::fs::create_dir_all(&config.data.dir)?;
    let list_path = config.data.list_path(&run);

    // Truncate any prior list for this run
    let file = File::create(&list_path)?;
    let mut writer = BufWriter::new(file);

    let summary = scan_tree(root, &mut writer)?;
    writer.flush()?;

    println!("scan {}", run);
    println!("  root: {}", root.display());
    println!("  files listed: {}", summary.files);
    println!("  directories visited: {}", summary.directories);
    println!("  list: {}", list_path.display());
    Ok(())
}

/// Walk `root` depth-first in sorted order, streaming each eligible path to
/// `out`. Paths are normalized to forward slashes. Nothing is held in
/// memory beyond the current entry.
pub fn scan_tree(root: &Path, out: &mut dyn Write) -> Result<ScanSummary> {
    let mut summary = ScanSummary {
        files: 0,
        directories: 0,
    };

    let walker = WalkDir::new(root).sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            summary.directories += 1;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if !has_media_extension(entry.path()) {
            continue;
        }

        let normalized = normalize_path(&entry.path().to_string_lossy());
        writeln!(out, "{}", normalized)?;
        summary.files += 1;
    }

    Ok(summary)
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Canonical separator form for list artifacts: forward slashes only.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extension_filter_case_insensitive() {
        assert!(has_media_extension(Path::new("photo.JPG")));
        assert!(has_media_extension(Path::new("photo.jpeg")));
        assert!(has_media_extension(Path::new("anim.GIF")));
        assert!(!has_media_extension(Path::new("photo.TXT")));
        assert!(!has_media_extension(Path::new("notes.md")));
        assert!(!has_media_extension(Path::new("no_extension")));
    }

    #[test]
    fn test_normalize_backslashes() {
        assert_eq!(
            normalize_path(r"d:\archive\photos\a.jpg"),
            "d:/archive/photos/a.jpg"
        );
        assert_eq!(normalize_path("/already/fine.png"), "/already/fine.png");
    }

    #[test]
    fn test_scan_filters_and_recurses() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.jpg"), b"x").unwrap();
        fs::write(root.join("b.TXT"), b"x").unwrap();
        fs::write(root.join("sub/c.PNG"), b"x").unwrap();

        let mut out = Vec::new();
        let summary = scan_tree(root, &mut out).unwrap();

        let listing = String::from_utf8(out).unwrap();
        assert_eq!(summary.files, 2);
        assert!(listing.contains("a.jpg"));
        assert!(listing.contains("c.PNG"));
        assert!(!listing.contains("b.TXT"));
    }

    #[test]
    fn test_scan_deterministic_ordering() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        for name in ["zeta.jpg", "alpha.jpg", "mid.png"] {
            fs::write(root.join(name), b"x").unwrap();
        }

        let mut first = Vec::new();
        scan_tree(root, &mut first).unwrap();
        let mut second = Vec::new();
        scan_tree(root, &mut second).unwrap();

        assert_eq!(first, second, "unchanged tree must scan identically");

        // Sorted within a directory
        let lines: Vec<&str> = std::str::from_utf8(&first).unwrap().lines().collect();
        assert!(lines[0].ends_with("alpha.jpg"));
        assert!(lines[2].ends_with("zeta.jpg"));
    }
}
