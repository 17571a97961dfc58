use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where list artifacts, checkpoints, ledgers, and failure lists live.
#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub dir: PathBuf,
}

impl DataConfig {
    /// List artifact: one enumerated path per line.
    pub fn list_path(&self, run: &str) -> PathBuf {
        self.dir.join(format!("{run}.lst"))
    }

    /// Checkpoint artifact: absent, empty, or one list entry.
    pub fn checkpoint_path(&self, run: &str) -> PathBuf {
        self.dir.join(format!("{run}.sav"))
    }

    /// Output ledger: newline-delimited JSON asset records.
    pub fn ledger_path(&self, run: &str) -> PathBuf {
        self.dir.join(format!("{run}.jsonl"))
    }

    /// Failure ledger: one failed source path per line.
    pub fn failure_path(&self, run: &str) -> PathBuf {
        self.dir.join(format!("{run}.fail.lst"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    /// Path to the vision-model CLI executable.
    pub bin: PathBuf,
    /// Model weights passed as `-m`.
    pub model: PathBuf,
    /// Multimodal projector passed as `--mmproj`.
    #[serde(default)]
    pub mmproj: Option<PathBuf>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_prompt() -> String {
    "Describe the image in detail, using approximately 300 words. \
     Structure your response into not more than four paragraphs, separated \
     by \"[BREAK]\". Begin your answer with \"[START]\"."
        .to_string()
}

fn default_generator_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of a llama.cpp-compatible embedding server.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            endpoint: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidate depth each source contributes to hybrid fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    /// RRF damping constant for the lexical source.
    #[serde(default = "default_rrf_k")]
    pub rrf_k_lexical: f64,
    /// RRF damping constant for the vector source.
    #[serde(default = "default_rrf_k")]
    pub rrf_k_vector: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            rrf_k_lexical: default_rrf_k(),
            rrf_k_vector: default_rrf_k(),
        }
    }
}

fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    50
}
fn default_rrf_k() -> f64 {
    60.0
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.candidate_k_lexical < 1 || config.retrieval.candidate_k_vector < 1 {
        anyhow::bail!("retrieval.candidate_k_* must be >= 1");
    }
    if config.retrieval.rrf_k_lexical < 0.0 || config.retrieval.rrf_k_vector < 0.0 {
        anyhow::bail!("retrieval.rrf_k_* must be non-negative");
    }

    // Validate generator
    if let Some(ref generator) = config.generator {
        if generator.timeout_secs == 0 {
            anyhow::bail!("generator.timeout_secs must be > 0");
        }
    }

    // Validate embedding
    if config.embedding.is_enabled() && (config.embedding.dims.is_none() || config.embedding.dims == Some(0)) {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "llamacpp" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or llamacpp.",
            other
        ),
    }

    Ok(config)
}
