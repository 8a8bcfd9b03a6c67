//! Embedding capability for the semantic cache.
//!
//! One fixed model per process. The HTTP implementation targets an
//! Ollama-style `/api/embeddings` endpoint; the hashing implementation is a
//! deterministic stand-in for CI, where no embedding model is reachable.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse embedding response: {0}")]
    Parse(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError>;

    /// Fixed output dimension for every vector this embedder produces.
    fn dimensions(&self) -> usize;
}

/// HTTP embedder for an Ollama-style endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f64>,
}

impl OllamaEmbedder {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Parse(
                "empty embedding in response".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic bag-of-tokens embedder.
///
/// Lowercases, splits on non-alphanumeric boundaries, hashes each token
/// into a bucket, and L2-normalizes the counts. Near-duplicate phrasings
/// land close in cosine space, which is all the semantic-cache tests need.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in token.bytes() {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let mut vec = vec![0.0f64; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vec[self.bucket(token)] += 1.0;
        }

        let norm = vec.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut vec {
                *x /= norm;
            }
        }
        Ok(vec)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
