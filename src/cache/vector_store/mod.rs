//! Vector storage capability behind the semantic cache.
//!
//! The key space is partitioned by `(tenant_id, plan_sig)`; a lookup only
//! ever sees entries from its own partition, which is what makes semantic
//! hits safe across tenants and plans. Lookup returns the single nearest
//! unexpired entry by cosine distance; the threshold decision belongs to
//! the semantic cache layer, not the store.

mod memory;
mod pgvector;

use std::time::Duration;

use async_trait::async_trait;
pub use memory::MemoryVectorStore;
pub use pgvector::PgvectorStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type VectorStoreResult<T> = Result<T, VectorStoreError>;

/// The nearest unexpired entry for a query vector.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub id: String,
    pub response_json: serde_json::Value,
    /// `1 - cosine_distance` to the query.
    pub similarity: f64,
}

/// A new entry to persist after a backend success.
#[derive(Debug)]
pub struct NewSemanticEntry<'a> {
    pub tenant_id: &'a str,
    pub plan_sig: &'a str,
    pub request_hash: &'a str,
    pub prompt_text: &'a str,
    pub embedding: &'a [f64],
    pub response: &'a serde_json::Value,
    pub ttl: Duration,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Nearest unexpired entry in the `(tenant, plan_sig)` partition, or
    /// `None` when the partition is empty.
    async fn semantic_lookup(
        &self,
        tenant_id: &str,
        plan_sig: &str,
        query: &[f64],
    ) -> VectorStoreResult<Option<SemanticMatch>>;

    /// Persist an entry, returning its id.
    async fn semantic_store(&self, entry: NewSemanticEntry<'_>) -> VectorStoreResult<String>;

    /// Drop expired entries, returning how many were removed.
    async fn cleanup_expired(&self) -> VectorStoreResult<u64>;

    async fn health_check(&self) -> VectorStoreResult<()>;
}

/// Cosine distance between two vectors. Zero-magnitude vectors compare as
/// maximally distant rather than dividing by zero.
pub(crate) fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
