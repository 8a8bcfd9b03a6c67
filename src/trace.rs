//! Request trace store.
//!
//! Every terminal outcome of a request (hit, miss-served, degraded,
//! rejected, queue-full, backend-error) produces exactly one trace row.
//! Trace writes are best-effort: a failed insert is logged and never
//! surfaced to the caller.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TraceStoreError {
    #[error("Database error: {0}")]
    Database(String),
}

/// One row in `request_traces`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub request_id: String,
    pub tenant_id: String,
    pub endpoint: String,
    pub model: String,
    pub status_code: u16,
    pub request_hash: String,
    pub latency_ms: u64,
    pub backend_latency_ms: Option<u64>,
    pub queue_wait_ms: Option<u64>,
    pub backend_ttft_ms: Option<u64>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub request_json: serde_json::Value,
    pub response_json: serde_json::Value,
    pub error_json: serde_json::Value,
    pub policy_version: String,
    pub plan_json: serde_json::Value,
    pub decision_trace_json: serde_json::Value,
    pub cache_json: serde_json::Value,
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn insert_trace(&self, record: TraceRecord) -> Result<(), TraceStoreError>;
}

/// Postgres-backed trace store.
pub struct PgTraceStore {
    pool: PgPool,
}

impl PgTraceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the traces table. Called once during startup.
    pub async fn initialize(&self) -> Result<(), TraceStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_traces (
                id BIGSERIAL PRIMARY KEY,
                request_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                model TEXT NOT NULL,
                status_code INT NOT NULL,
                request_hash TEXT NOT NULL,
                latency_ms BIGINT NOT NULL,
                backend_latency_ms BIGINT,
                queue_wait_ms BIGINT,
                backend_ttft_ms BIGINT,
                prompt_tokens INT,
                completion_tokens INT,
                total_tokens INT,
                request_json JSONB,
                response_json JSONB,
                error_json JSONB,
                policy_version TEXT NOT NULL,
                plan_json JSONB,
                decision_trace_json JSONB,
                cache_json JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TraceStoreError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS request_traces_tenant_idx \
             ON request_traces (tenant_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TraceStoreError::Database(e.to_string()))?;

        info!("trace store initialized");
        Ok(())
    }
}

#[async_trait]
impl TraceStore for PgTraceStore {
    async fn insert_trace(&self, record: TraceRecord) -> Result<(), TraceStoreError> {
        sqlx::query(
            r#"
            INSERT INTO request_traces (
              request_id, tenant_id, endpoint, model, status_code,
              request_hash, latency_ms, backend_latency_ms, queue_wait_ms, backend_ttft_ms,
              prompt_tokens, completion_tokens, total_tokens,
              request_json, response_json, error_json,
              policy_version, plan_json, decision_trace_json, cache_json
            )
            VALUES (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
              $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            "#,
        )
        .bind(&record.request_id)
        .bind(&record.tenant_id)
        .bind(&record.endpoint)
        .bind(&record.model)
        .bind(i32::from(record.status_code))
        .bind(&record.request_hash)
        .bind(record.latency_ms as i64)
        .bind(record.backend_latency_ms.map(|v| v as i64))
        .bind(record.queue_wait_ms.map(|v| v as i64))
        .bind(record.backend_ttft_ms.map(|v| v as i64))
        .bind(record.prompt_tokens.map(|v| v as i32))
        .bind(record.completion_tokens.map(|v| v as i32))
        .bind(record.total_tokens.map(|v| v as i32))
        .bind(&record.request_json)
        .bind(&record.response_json)
        .bind(&record.error_json)
        .bind(&record.policy_version)
        .bind(&record.plan_json)
        .bind(&record.decision_trace_json)
        .bind(&record.cache_json)
        .execute(&self.pool)
        .await
        .map_err(|e| TraceStoreError::Database(e.to_string()))?;
        Ok(())
    }
}

/// In-memory trace store for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryTraceStore {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn insert_trace(&self, record: TraceRecord) -> Result<(), TraceStoreError> {
        self.records.lock().push(record);
        Ok(())
    }
}
