//! HTTP adapter for an Ollama-style `/api/generate` endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::{BackendAdapter, BackendError, GenerationResult};

pub struct OllamaAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();

        let payload = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let data: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let total_tokens = match (data.prompt_eval_count, data.eval_count) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        };

        Ok(GenerationResult {
            text: data.response.trim().to_string(),
            prompt_tokens: data.prompt_eval_count,
            completion_tokens: data.eval_count,
            total_tokens,
            backend_latency_ms: Some(latency_ms),
            backend_ttft_ms: None,
            backend_name: Some(self.name().to_string()),
            backend_meta: Some(serde_json::json!({"endpoint": "/api/generate"})),
        })
    }
}
