//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete backends:
//! - **disabled** — returns errors; vector retrieval is simply ineligible.
//! - **openai** — the OpenAI embeddings API with batching, retry, backoff.
//! - **llamacpp** — a local llama.cpp server's `/embedding` endpoint, for
//!   corpora indexed entirely on-machine.
//!
//! Also provides the vector utilities shared by ingestion and retrieval:
//! [`vec_to_blob`] / [`blob_to_vec`] for BLOB storage, and
//! [`cosine_distance`] for the vector retrieval mode (smaller = closer).
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s); other 4xx fail
//! immediately.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Metadata surface of an embedding backend. The embedding computation
/// itself lives in [`embed_texts`] (free function, config-dispatched).
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`, `"bge-small"`).
    fn model_name(&self) -> &str;
    /// Embedding dimensionality; every stored vector must match it.
    fn dims(&self) -> usize;
}

/// Embed a batch of texts using the configured provider.
pub async fn embed_texts(
    _provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "llamacpp" => embed_llamacpp(config, texts).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single text (e.g. a search query).
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_texts(provider, config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" | "llamacpp" => Ok(Box::new(RemoteProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled provider ============

/// No-op provider used when embeddings are not configured. Assets ingested
/// without vectors remain lexically searchable.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ Remote providers ============

/// Shared metadata for the HTTP-backed providers.
pub struct RemoteProvider {
    model: String,
    dims: usize,
}

impl RemoteProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| config.provider.clone());

        if config.provider == "openai" && std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_json_with_retry(
        &client,
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
        config.max_retries,
    )
    .await?;

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        embeddings.push(json_array_to_vec(embedding));
    }

    Ok(embeddings)
}

/// llama.cpp server: one `POST /embedding` call per text.
async fn embed_llamacpp(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
    let url = format!("{}/embedding", endpoint.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut embeddings = Vec::with_capacity(texts.len());
    for text in texts {
        let body = serde_json::json!({ "content": text });
        let json = post_json_with_retry(&client, &url, None, &body, config.max_retries).await?;

        // The server returns either {"embedding": [...]} or a one-element
        // array of that object depending on version.
        let embedding = json
            .get("embedding")
            .or_else(|| json.get(0).and_then(|o| o.get("embedding")))
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid llama.cpp response: missing embedding"))?;

        embeddings.push(json_array_to_vec(embedding));
    }

    Ok(embeddings)
}

async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Embedding API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

fn json_array_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance between two embedding vectors: `1 − cos(a, b)`.
///
/// `0.0` = identical direction, `1.0` = orthogonal, `2.0` = opposite.
/// Mismatched or empty vectors are maximally distant rather than an error,
/// so a malformed stored vector can never rank first.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 2.0;
    }

    1.0 - dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_vectors_maximally_distant() {
        assert_eq!(cosine_distance(&[1.0, 2.0], &[1.0]), 2.0);
        assert_eq!(cosine_distance(&[], &[]), 2.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }

    #[test]
    fn test_disabled_provider_metadata() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    #[tokio::test]
    async fn test_disabled_provider_refuses_to_embed() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        let err = embed_texts(provider.as_ref(), &config, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
