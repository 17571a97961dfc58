//! Streaming content digests.
//!
//! The digest is the authoritative change-detection key for an asset.
//! Modification times are not trusted here: staging copies a file and
//! copies routinely reset them.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 of the file's bytes, read in fixed-size chunks.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Read failed while hashing {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
