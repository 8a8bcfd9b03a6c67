//! In-memory vector store for single-node deployments and tests.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    NewSemanticEntry, SemanticMatch, VectorBackend, VectorStoreResult, cosine_distance,
};

struct StoredEntry {
    id: String,
    embedding: Vec<f64>,
    response_json: serde_json::Value,
    expires_at: Instant,
}

/// Brute-force nearest-neighbor store keyed by `(tenant, plan_sig)`.
///
/// Fine for the entry counts a single relay node sees; anything larger
/// belongs in pgvector.
pub struct MemoryVectorStore {
    partitions: DashMap<(String, String), Vec<StoredEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorStore {
    async fn semantic_lookup(
        &self,
        tenant_id: &str,
        plan_sig: &str,
        query: &[f64],
    ) -> VectorStoreResult<Option<SemanticMatch>> {
        let key = (tenant_id.to_string(), plan_sig.to_string());
        let Some(entries) = self.partitions.get(&key) else {
            return Ok(None);
        };

        let now = Instant::now();
        let best = entries
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| (e, cosine_distance(&e.embedding, query)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b));

        Ok(best.map(|(entry, distance)| SemanticMatch {
            id: entry.id.clone(),
            response_json: entry.response_json.clone(),
            similarity: 1.0 - distance,
        }))
    }

    async fn semantic_store(&self, entry: NewSemanticEntry<'_>) -> VectorStoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let key = (entry.tenant_id.to_string(), entry.plan_sig.to_string());
        self.partitions.entry(key).or_default().push(StoredEntry {
            id: id.clone(),
            embedding: entry.embedding.to_vec(),
            response_json: entry.response.clone(),
            expires_at: Instant::now() + entry.ttl,
        });
        Ok(id)
    }

    async fn cleanup_expired(&self) -> VectorStoreResult<u64> {
        let now = Instant::now();
        let mut removed = 0u64;
        for mut partition in self.partitions.iter_mut() {
            let before = partition.len();
            partition.retain(|e| e.expires_at > now);
            removed += (before - partition.len()) as u64;
        }
        Ok(removed)
    }

    async fn health_check(&self) -> VectorStoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn entry<'a>(
        tenant: &'a str,
        plan_sig: &'a str,
        embedding: &'a [f64],
        response: &'a serde_json::Value,
        ttl: Duration,
    ) -> NewSemanticEntry<'a> {
        NewSemanticEntry {
            tenant_id: tenant,
            plan_sig,
            request_hash: "h",
            prompt_text: "p",
            embedding,
            response,
            ttl,
        }
    }

    #[tokio::test]
    async fn lookup_returns_nearest_entry() {
        let store = MemoryVectorStore::new();
        let resp_a = serde_json::json!({"answer": "a"});
        let resp_b = serde_json::json!({"answer": "b"});
        store
            .semantic_store(entry("t", "sig", &[1.0, 0.0], &resp_a, Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .semantic_store(entry("t", "sig", &[0.0, 1.0], &resp_b, Duration::from_secs(60)))
            .await
            .unwrap();

        let m = store
            .semantic_lookup("t", "sig", &[0.9, 0.1])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.response_json["answer"], "a");
        assert!(m.similarity > 0.9);
    }

    #[tokio::test]
    async fn partitions_are_isolated_by_tenant_and_plan() {
        let store = MemoryVectorStore::new();
        let resp = serde_json::json!({"x": 1});
        store
            .semantic_store(entry("t1", "sig", &[1.0, 0.0], &resp, Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(
            store
                .semantic_lookup("t2", "sig", &[1.0, 0.0])
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .semantic_lookup("t1", "other", &[1.0, 0.0])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_cleanable() {
        let store = MemoryVectorStore::new();
        let resp = serde_json::json!({});
        store
            .semantic_store(entry("t", "sig", &[1.0], &resp, Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(
            store
                .semantic_lookup("t", "sig", &[1.0])
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
    }
}
