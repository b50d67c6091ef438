//! Embedding provider abstraction and implementations.
//!
//! A provider is chosen at startup by a single `provider:model` string:
//!
//! | Prefix | Backend |
//! |--------|---------|
//! | `openai:` | OpenAI `POST /v1/embeddings` (needs `OPENAI_API_KEY`) |
//! | `ollama:` | Local Ollama `POST /api/embed` |
//!
//! Vectors are stored padded to a fixed dimension ([`EMBEDDING_DIM`]); a
//! provider whose native dimension exceeds it is rejected at store
//! construction, before any writes.
//!
//! # Retry Strategy
//!
//! HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{DocdexError, Result};

/// Fixed width of stored vectors. Providers with a smaller native
/// dimension are zero-padded up to this.
pub const EMBEDDING_DIM: usize = 1536;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Native vector dimensionality of the model.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| DocdexError::Embedding("empty embedding response".to_string()))
    }
}

/// Instantiate the provider selected by `config.model` (`provider:model`).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let (provider, model) = config
        .model
        .split_once(':')
        .ok_or_else(|| {
            DocdexError::Embedding(format!(
                "embedding model '{}' must be of the form provider:model",
                config.model
            ))
        })?;
    match provider {
        "openai" => Ok(Box::new(OpenAiProvider::new(model, config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(model, config))),
        other => Err(DocdexError::Embedding(format!(
            "unknown embedding provider '{other}' (supported: openai, ollama)"
        ))),
    }
}

/// Native dimensions of well-known models, used when the config does not
/// override `dims`.
fn known_dims(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "nomic-embed-text" | "nomic-embed-text-v1.5" => Some(768),
        "all-minilm" | "all-minilm-l6-v2" => Some(384),
        "mxbai-embed-large" => Some(1024),
        _ => None,
    }
}

fn resolve_dims(model: &str, config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .or_else(|| known_dims(model))
        .ok_or_else(|| {
            DocdexError::Embedding(format!(
                "unknown model '{model}': set embedding.dims in the config"
            ))
        })
}

// ============ OpenAI ============

pub struct OpenAiProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DocdexError::Embedding("OPENAI_API_KEY not set".to_string()))?;
        Ok(Self {
            model: model.to_string(),
            dims: resolve_dims(model, config)?,
            api_key,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| DocdexError::Embedding(e.to_string()))?;
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }
            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| DocdexError::Embedding(e.to_string()))?;
                        return parse_openai_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("OpenAI API error {status}: {text}"));
                        continue;
                    }
                    return Err(DocdexError::Embedding(format!(
                        "OpenAI API error {status}: {text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }
        Err(DocdexError::Embedding(
            last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        ))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| DocdexError::Embedding("missing data array in response".to_string()))?;
    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| DocdexError::Embedding("missing embedding in response".to_string()))?;
        embeddings.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ============ Ollama ============

pub struct OllamaProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    max_retries: u32,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Self {
        Self {
            model: model.to_string(),
            dims: config.dims.or_else(|| known_dims(model)),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        // Unknown Ollama models default to the store width; actual vectors
        // may be narrower and are padded on insert.
        self.dims.unwrap_or(EMBEDDING_DIM)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| DocdexError::Embedding(e.to_string()))?;
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }
            let resp = client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| DocdexError::Embedding(e.to_string()))?;
                        return parse_ollama_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("Ollama API error {status}: {text}"));
                        continue;
                    }
                    return Err(DocdexError::Embedding(format!(
                        "Ollama API error {status}: {text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(format!(
                        "Ollama connection error (is Ollama running at {}?): {e}",
                        self.url
                    ));
                    continue;
                }
            }
        }
        Err(DocdexError::Embedding(
            last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        ))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| DocdexError::Embedding("missing embeddings array in response".to_string()))?;
    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let values = embedding
            .as_array()
            .ok_or_else(|| DocdexError::Embedding("embedding is not an array".to_string()))?;
        result.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(result)
}

// ============ Vector utilities ============

/// Zero-pad a vector to `dim` components. Fails if the vector is wider.
pub fn pad_vector(mut vec: Vec<f32>, dim: usize) -> Result<Vec<f32>> {
    if vec.len() > dim {
        return Err(DocdexError::Dimension {
            actual: vec.len(),
            max: dim,
        });
    }
    vec.resize(dim, 0.0);
    Ok(vec)
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
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

/// Squared L2 distance between two equal-length vectors.
pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn padding_extends_with_zeros() {
        let padded = pad_vector(vec![1.0, 2.0], 4).unwrap();
        assert_eq!(padded, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn padding_rejects_oversized() {
        assert!(matches!(
            pad_vector(vec![0.0; 8], 4),
            Err(DocdexError::Dimension { actual: 8, max: 4 })
        ));
    }

    #[test]
    fn l2_distance_of_identical_is_zero() {
        let v = vec![0.5, -0.25, 4.0];
        assert_eq!(l2_distance_sq(&v, &v), 0.0);
    }

    #[test]
    fn l2_distance_orders_by_closeness() {
        let q = vec![1.0, 0.0];
        let near = vec![0.9, 0.0];
        let far = vec![-1.0, 0.0];
        assert!(l2_distance_sq(&q, &near) < l2_distance_sq(&q, &far));
    }

    #[test]
    fn provider_string_must_have_prefix() {
        let config = EmbeddingConfig {
            model: "text-embedding-3-small".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
