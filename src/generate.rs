//! Description generation via an external vision-model CLI.
//!
//! The generator is a heavyweight external resource (a llama.cpp
//! multimodal CLI in the reference deployment) invoked once per asset,
//! never concurrently. It is modelled as a trait so the job runner can be
//! exercised without spawning processes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::scan::normalize_path;

/// Descriptions shorter than this are treated as low-confidence.
pub const MIN_DESCRIPTION_LEN: usize = 100;

/// Required structural marker the prompt asks the model to emit.
pub const STRUCTURAL_MARKER: &str = "[START]";

/// Sentinel stored for low-confidence items so they stay searchable and
/// auditable instead of being dropped.
pub const SENTINEL_DESCRIPTION: &str = "[FAILED TO GENERATE DESCRIPTION]";

/// Sentinel for a generator run that produced no output at all.
pub const EMPTY_OUTPUT: &str = "[EMPTY OUTPUT]";

#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    /// Produce a description for the media file at `image`.
    ///
    /// The path handed in is already staged (ASCII-safe). Implementations
    /// return whitespace-normalised text or an error; confidence checking
    /// is the caller's job.
    async fn describe(&self, image: &Path) -> Result<String>;
}

/// A generated description passes the confidence check when it is long
/// enough and carries the structural marker the prompt demands.
pub fn is_confident(description: &str) -> bool {
    description.len() >= MIN_DESCRIPTION_LEN && description.contains(STRUCTURAL_MARKER)
}

/// Collapse all whitespace runs to single spaces.
pub fn normalize_output(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============ Subprocess generator ============

/// Invokes the configured vision CLI once per call.
pub struct CliGenerator {
    config: GeneratorConfig,
}

impl CliGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DescriptionGenerator for CliGenerator {
    async fn describe(&self, image: &Path) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.config.bin);
        cmd.arg("-m").arg(&self.config.model);
        if let Some(ref mmproj) = self.config.mmproj {
            cmd.arg("--mmproj").arg(mmproj);
        }
        cmd.arg("--image")
            .arg(normalize_path(&image.to_string_lossy()))
            .arg("--prompt")
            .arg(&self.config.prompt)
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.with_context(|| {
                format!("Failed to spawn generator: {}", self.config.bin.display())
            })?,
            Err(_) => bail!(
                "Generator timed out after {}s for {}",
                self.config.timeout_secs,
                image.display()
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Generator exited with {} for {}: {}",
                output.status,
                image.display(),
                stderr.trim()
            );
        }

        let description = normalize_output(&String::from_utf8_lossy(&output.stdout));
        if description.is_empty() {
            return Ok(EMPTY_OUTPUT.to_string());
        }
        Ok(description)
    }
}
