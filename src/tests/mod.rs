//! End-to-end tests against the real router with in-memory storage, the
//! mock backend, and the deterministic embedder.


use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{Router, body::Body};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::util::ServiceExt;

use crate::{
    AppState,
    backend::{BackendAdapter, BackendError, GenerationResult, MockAdapter},
    cache::{MemoryKvCache, ResponseCache, SemanticCache, vector_store::MemoryVectorStore},
    config::{PolicyConfig, RelayConfig},
    embedding::HashingEmbedder,
    scheduler::Scheduler,
    trace::MemoryTraceStore,
};

/// Mock backend wrapper that counts invocations, for asserting that cache
/// hits skip the backend.
pub(crate) struct CountingAdapter {
    inner: MockAdapter,
    pub calls: AtomicU32,
}

impl CountingAdapter {
    pub fn new() -> Self {
        Self {
            inner: MockAdapter,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BackendAdapter for CountingAdapter {
    fn name(&self) -> &str {
        "counting-mock"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(model, prompt, temperature, max_tokens).await
    }
}

/// Backend that records invocation order and holds each call for a fixed
/// delay, so queueing behavior is observable from the outside.
pub(crate) struct SlowAdapter {
    pub delay: Duration,
    pub served: Mutex<Vec<String>>,
}

impl SlowAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            served: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BackendAdapter for SlowAdapter {
    fn name(&self) -> &str {
        "slow-mock"
    }

    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<GenerationResult, BackendError> {
        // First line of the prompt is "user:<label>".
        let label = prompt
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("user:")
            .to_string();
        self.served.lock().push(label.clone());
        tokio::time::sleep(self.delay).await;
        Ok(GenerationResult {
            text: label,
            backend_latency_ms: Some(self.delay.as_millis() as u64),
            ..GenerationResult::default()
        })
    }
}

/// Failing backend for the backend-error path.
pub(crate) struct FailingAdapter;

#[async_trait]
impl BackendAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "failing-mock"
    }

    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<GenerationResult, BackendError> {
        Err(BackendError::Internal("synthetic failure".to_string()))
    }
}

pub(crate) struct TestRelay {
    pub router: Router,
    pub state: AppState,
    pub traces: Arc<MemoryTraceStore>,
}

/// Build a fully in-memory relay around the given policy and backend and
/// start its worker pool.
pub(crate) fn test_relay(policy: &str, backend: Arc<dyn BackendAdapter>) -> TestRelay {
    let policy = PolicyConfig::parse(policy).expect("test policy parses");
    let config = RelayConfig::default();

    let traces = Arc::new(MemoryTraceStore::new());
    let scheduler = Scheduler::new(policy.scheduler.clone());
    let state = AppState {
        config: Arc::new(config),
        policy: Arc::new(policy),
        scheduler,
        backend,
        response_cache: Arc::new(ResponseCache::new(
            Arc::new(MemoryKvCache::new()),
            Duration::from_secs(300),
        )),
        semantic_cache: Arc::new(SemanticCache::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashingEmbedder::new(256)),
        )),
        traces: traces.clone(),
    };
    state.scheduler.clone().start();

    TestRelay {
        router: crate::routes::router(state.clone()),
        state,
        traces,
    }
}

/// POST a chat-completions body, returning status and parsed JSON.
pub(crate) async fn post_chat(
    router: &Router,
    tenant: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant-id", tenant);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub(crate) fn user_message(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "m",
        "messages": [{"role": "user", "content": content}],
    })
}
