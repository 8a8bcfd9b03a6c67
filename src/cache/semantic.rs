//! Semantic response cache: second tier of the cache layer.
//!
//! On an exact miss, the canonical prompt is embedded and the nearest
//! unexpired entry in the `(tenant, plan_signature)` partition is fetched.
//! A lookup is a hit only when `similarity >= threshold`; a below-threshold
//! candidate is still reported in the provenance for threshold tuning.
//! Embedding or store failures degrade to miss behavior.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use super::{
    provenance::SemanticProvenance,
    vector_store::{NewSemanticEntry, VectorBackend},
};
use crate::{
    api_types::ChatCompletionsResponse, embedding::Embedder, normalize::NormalizedRequest,
    plan::ExecutionPlan,
};

/// Result of a semantic-tier probe.
#[derive(Debug)]
pub enum SemanticLookup {
    Hit {
        response: ChatCompletionsResponse,
        similarity: f64,
        entry_id: String,
    },
    /// No candidate, a below-threshold candidate, or a degraded failure.
    Miss,
    /// Semantic caching is disabled for this plan.
    Bypass,
}

pub struct SemanticCache {
    store: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn VectorBackend>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn lookup(
        &self,
        tenant_id: &str,
        plan: &ExecutionPlan,
        plan_sig: &str,
        normalized: &NormalizedRequest,
        provenance: &mut SemanticProvenance,
    ) -> SemanticLookup {
        let cfg = &plan.cache.semantic;
        provenance.enabled = cfg.enabled;
        provenance.plan_sig = Some(plan_sig.to_string());
        if !cfg.enabled {
            return SemanticLookup::Bypass;
        }

        let query = match self.embedder.embed(&normalized.canonical_text).await {
            Ok(vec) => vec,
            Err(e) => {
                provenance.hit = Some(false);
                provenance.error = Some(e.to_string());
                warn!(error = %e, "embedding failed, skipping semantic lookup");
                return SemanticLookup::Miss;
            }
        };

        let candidate = match self
            .store
            .semantic_lookup(tenant_id, plan_sig, &query)
            .await
        {
            Ok(candidate) => candidate,
            Err(e) => {
                provenance.hit = Some(false);
                provenance.error = Some(e.to_string());
                warn!(error = %e, "semantic lookup failed, treating as miss");
                return SemanticLookup::Miss;
            }
        };

        let Some(best) = candidate else {
            provenance.hit = Some(false);
            return SemanticLookup::Miss;
        };

        provenance.threshold = Some(cfg.threshold);
        provenance.verifier = Some(cfg.verifier.clone());

        if best.similarity >= cfg.threshold {
            match serde_json::from_value::<ChatCompletionsResponse>(best.response_json) {
                Ok(response) => {
                    provenance.hit = Some(true);
                    provenance.similarity = Some(best.similarity);
                    provenance.entry_id = Some(best.id.clone());
                    debug!(entry_id = %best.id, similarity = best.similarity, "semantic cache hit");
                    SemanticLookup::Hit {
                        response,
                        similarity: best.similarity,
                        entry_id: best.id,
                    }
                }
                Err(e) => {
                    provenance.hit = Some(false);
                    provenance.error = Some(e.to_string());
                    warn!(entry_id = %best.id, error = %e, "cached semantic entry is unreadable");
                    SemanticLookup::Miss
                }
            }
        } else {
            provenance.hit = Some(false);
            provenance.best_similarity = Some(best.similarity);
            provenance.best_entry_id = Some(best.id);
            SemanticLookup::Miss
        }
    }

    /// Store a successful response. Never fails the request.
    pub async fn store(
        &self,
        tenant_id: &str,
        plan: &ExecutionPlan,
        plan_sig: &str,
        normalized: &NormalizedRequest,
        response: &ChatCompletionsResponse,
        provenance: &mut SemanticProvenance,
    ) {
        let cfg = &plan.cache.semantic;
        if !cfg.enabled {
            provenance.stored = Some(false);
            return;
        }

        let embedding = match self.embedder.embed(&normalized.canonical_text).await {
            Ok(vec) => vec,
            Err(e) => {
                provenance.stored = Some(false);
                provenance.error = Some(e.to_string());
                warn!(error = %e, "embedding failed, semantic store skipped");
                return;
            }
        };

        let response_json = match serde_json::to_value(response) {
            Ok(value) => value,
            Err(e) => {
                provenance.stored = Some(false);
                provenance.error = Some(e.to_string());
                return;
            }
        };

        let entry = NewSemanticEntry {
            tenant_id,
            plan_sig,
            request_hash: &normalized.request_hash,
            prompt_text: &normalized.canonical_text,
            embedding: &embedding,
            response: &response_json,
            ttl: Duration::from_secs(cfg.ttl_seconds),
        };

        match self.store.semantic_store(entry).await {
            Ok(entry_id) => {
                provenance.stored = Some(true);
                provenance.entry_id = Some(entry_id);
                provenance.ttl_seconds = Some(cfg.ttl_seconds);
                provenance.threshold = Some(cfg.threshold);
                provenance.verifier = Some(cfg.verifier.clone());
            }
            Err(e) => {
                provenance.stored = Some(false);
                provenance.error = Some(e.to_string());
                warn!(error = %e, "semantic store failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api_types::Usage,
        cache::vector_store::MemoryVectorStore,
        config::TenantCaching,
        embedding::HashingEmbedder,
        normalize::normalize_messages,
    };
    use crate::api_types::ChatMessage;

    fn semantic_plan(enabled: bool, threshold: f64) -> ExecutionPlan {
        let mut cache = TenantCaching::default();
        cache.semantic.enabled = enabled;
        cache.semantic.threshold = threshold;
        ExecutionPlan {
            plan_name: "short".to_string(),
            tier: "standard".to_string(),
            decoding_profile: "standard".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            cache,
        }
    }

    fn cache() -> SemanticCache {
        SemanticCache::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashingEmbedder::new(256)),
        )
    }

    fn normalized(text: &str) -> NormalizedRequest {
        normalize_messages(&[ChatMessage::new("user", text)])
    }

    fn response(text: &str) -> ChatCompletionsResponse {
        ChatCompletionsResponse::assistant("id", 0, "m", text, Usage::default())
    }

    #[tokio::test]
    async fn near_duplicate_prompt_hits_above_threshold() {
        let cache = cache();
        let plan = semantic_plan(true, 0.85);
        let first = normalized("What is an API gateway?");
        let mut prov = SemanticProvenance::default();
        cache
            .store("t", &plan, "sig", &first, &response("answer"), &mut prov)
            .await;
        assert_eq!(prov.stored, Some(true));

        let second = normalized("what is an api-gateway");
        let mut prov = SemanticProvenance::default();
        match cache.lookup("t", &plan, "sig", &second, &mut prov).await {
            SemanticLookup::Hit {
                response,
                similarity,
                ..
            } => {
                assert_eq!(response.choices[0].message.content, "answer");
                assert!(similarity >= 0.85);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(prov.hit, Some(true));
        assert_eq!(prov.threshold, Some(0.85));
    }

    #[tokio::test]
    async fn below_threshold_candidate_is_reported_as_near_miss() {
        let cache = cache();
        let plan = semantic_plan(true, 0.99);
        let mut prov = SemanticProvenance::default();
        cache
            .store(
                "t",
                &plan,
                "sig",
                &normalized("completely different topic entirely"),
                &response("other"),
                &mut prov,
            )
            .await;

        let mut prov = SemanticProvenance::default();
        let got = cache
            .lookup("t", &plan, "sig", &normalized("what is an api gateway"), &mut prov)
            .await;
        assert!(matches!(got, SemanticLookup::Miss));
        assert_eq!(prov.hit, Some(false));
        assert!(prov.best_similarity.is_some());
        assert!(prov.best_entry_id.is_some());
    }

    #[tokio::test]
    async fn disabled_semantic_caching_bypasses() {
        let cache = cache();
        let plan = semantic_plan(false, 0.9);
        let mut prov = SemanticProvenance::default();
        let got = cache
            .lookup("t", &plan, "sig", &normalized("hello"), &mut prov)
            .await;
        assert!(matches!(got, SemanticLookup::Bypass));
        assert!(!prov.enabled);
    }

    #[tokio::test]
    async fn partitions_do_not_leak_across_plan_signatures() {
        let cache = cache();
        let plan = semantic_plan(true, 0.5);
        let text = normalized("what is an api gateway");
        let mut prov = SemanticProvenance::default();
        cache
            .store("t", &plan, "sig-a", &text, &response("a"), &mut prov)
            .await;

        let mut prov = SemanticProvenance::default();
        let got = cache.lookup("t", &plan, "sig-b", &text, &mut prov).await;
        assert!(matches!(got, SemanticLookup::Miss));
        assert!(prov.best_similarity.is_none());
    }
}
