//! Generative backend capability.
//!
//! The relay addresses its backend through a single-method adapter; the
//! HTTP and mock variants are the only implementations. All adapter methods
//! receive their prompt fully assembled; the backend never sees raw chat
//! messages.

pub mod mock;
pub mod ollama;

use async_trait::async_trait;
pub use mock::MockAdapter;
pub use ollama::OllamaAdapter;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned a malformed response: {0}")]
    Malformed(String),

    #[error("Internal backend error: {0}")]
    Internal(String),
}

/// What the backend returned for one generation call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub backend_latency_ms: Option<u64>,
    pub backend_ttft_ms: Option<u64>,
    pub backend_name: Option<String>,
    pub backend_meta: Option<serde_json::Value>,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationResult, BackendError>;
}
