//! Deterministic mock backend for CI and local development.

use async_trait::async_trait;

use super::{BackendAdapter, BackendError, GenerationResult};

/// Echo prefix length, in characters.
const ECHO_CHARS: usize = 120;

/// Returns a deterministic abbreviated echo of the prompt with fixed token
/// counts, so end-to-end tests can assert on exact responses.
pub struct MockAdapter;

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<GenerationResult, BackendError> {
        let echo: String = prompt.chars().take(ECHO_CHARS).collect();
        Ok(GenerationResult {
            text: format!("(mock) {}", echo.replace('\n', " ")),
            prompt_tokens: Some(10),
            completion_tokens: Some(20),
            total_tokens: Some(30),
            backend_latency_ms: Some(50),
            backend_ttft_ms: None,
            backend_name: Some(self.name().to_string()),
            backend_meta: None,
        })
    }
}
