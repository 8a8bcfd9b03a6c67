//! Exact-match response cache: first tier of the cache layer.
//!
//! Keys are strict byte equality over `(tenant, plan_signature,
//! request_hash)`. Probe and store both record their outcome in the
//! request's [`ExactProvenance`]; storage failures degrade to miss
//! behavior and never surface to the caller.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use super::{
    keys::CacheKeys,
    provenance::ExactProvenance,
    traits::{KvCache, KvCacheExt},
};
use crate::{api_types::ChatCompletionsResponse, plan::ExecutionPlan};

/// Result of an exact-tier probe.
#[derive(Debug)]
pub enum ExactLookup {
    Hit(ChatCompletionsResponse),
    Miss,
    /// Exact caching is disabled for this plan.
    Bypass,
}

pub struct ResponseCache {
    kv: Arc<dyn KvCache>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Increment a metrics counter without letting failures matter.
    async fn bump(&self, key: String) {
        if let Err(e) = self.kv.incr(&key).await {
            debug!(counter = %key, error = %e, "metrics counter increment failed");
        }
    }

    pub async fn lookup(
        &self,
        tenant_id: &str,
        plan: &ExecutionPlan,
        plan_sig: &str,
        request_hash: &str,
        provenance: &mut ExactProvenance,
    ) -> ExactLookup {
        provenance.enabled = plan.cache.exact_enabled;
        if !plan.cache.exact_enabled {
            return ExactLookup::Bypass;
        }

        let key = CacheKeys::exact_response(tenant_id, plan_sig, request_hash);
        provenance.key = Some(key.clone());
        provenance.plan_sig = Some(plan_sig.to_string());

        match self.kv.get_json::<ChatCompletionsResponse>(&key).await {
            Ok(Some(response)) => {
                self.bump(CacheKeys::exact_hit_counter(tenant_id)).await;
                provenance.hit = Some(true);
                debug!(%key, "exact cache hit");
                ExactLookup::Hit(response)
            }
            Ok(None) => {
                self.bump(CacheKeys::exact_miss_counter(tenant_id)).await;
                provenance.hit = Some(false);
                ExactLookup::Miss
            }
            Err(e) => {
                // cache_unavailable: proceed as if the cache were disabled.
                self.bump(CacheKeys::exact_miss_counter(tenant_id)).await;
                provenance.hit = Some(false);
                provenance.error = Some(e.to_string());
                warn!(%key, error = %e, "exact cache probe failed, treating as miss");
                ExactLookup::Miss
            }
        }
    }

    /// Store a successful response. Never fails the request.
    pub async fn store(
        &self,
        tenant_id: &str,
        plan: &ExecutionPlan,
        plan_sig: &str,
        request_hash: &str,
        response: &ChatCompletionsResponse,
        provenance: &mut ExactProvenance,
    ) {
        if !plan.cache.exact_enabled {
            provenance.stored = Some(false);
            return;
        }

        let key = CacheKeys::exact_response(tenant_id, plan_sig, request_hash);
        match self.kv.set_json(&key, response, self.ttl).await {
            Ok(()) => {
                provenance.stored = Some(true);
                provenance.ttl_seconds = Some(self.ttl.as_secs());
                provenance.key = Some(key);
                provenance.plan_sig = Some(plan_sig.to_string());
            }
            Err(e) => {
                provenance.stored = Some(false);
                provenance.error = Some(e.to_string());
                warn!(%key, error = %e, "exact cache store failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api_types::Usage,
        cache::memory::MemoryKvCache,
        config::TenantCaching,
    };

    fn plan(exact_enabled: bool) -> ExecutionPlan {
        ExecutionPlan {
            plan_name: "short".to_string(),
            tier: "standard".to_string(),
            decoding_profile: "standard".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            cache: TenantCaching {
                exact_enabled,
                ..TenantCaching::default()
            },
        }
    }

    fn response() -> ChatCompletionsResponse {
        ChatCompletionsResponse::assistant("id", 0, "m", "cached", Usage::default())
    }

    #[tokio::test]
    async fn store_then_lookup_hits() {
        let cache = ResponseCache::new(Arc::new(MemoryKvCache::new()), Duration::from_secs(300));
        let plan = plan(true);
        let mut prov = ExactProvenance::default();

        cache
            .store("t", &plan, "sig", "hash", &response(), &mut prov)
            .await;
        assert_eq!(prov.stored, Some(true));
        assert_eq!(prov.ttl_seconds, Some(300));

        let mut prov = ExactProvenance::default();
        match cache.lookup("t", &plan, "sig", "hash", &mut prov).await {
            ExactLookup::Hit(r) => assert_eq!(r.choices[0].message.content, "cached"),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(prov.hit, Some(true));
    }

    #[tokio::test]
    async fn differing_plan_sig_or_tenant_misses() {
        let cache = ResponseCache::new(Arc::new(MemoryKvCache::new()), Duration::from_secs(300));
        let plan = plan(true);
        let mut prov = ExactProvenance::default();
        cache
            .store("t", &plan, "sig", "hash", &response(), &mut prov)
            .await;

        let mut prov = ExactProvenance::default();
        assert!(matches!(
            cache.lookup("t", &plan, "other-sig", "hash", &mut prov).await,
            ExactLookup::Miss
        ));
        let mut prov = ExactProvenance::default();
        assert!(matches!(
            cache.lookup("other-tenant", &plan, "sig", "hash", &mut prov).await,
            ExactLookup::Miss
        ));
    }

    #[tokio::test]
    async fn disabled_plans_bypass_without_touching_the_store() {
        let kv = Arc::new(MemoryKvCache::new());
        let cache = ResponseCache::new(kv.clone(), Duration::from_secs(300));
        let plan = plan(false);

        let mut prov = ExactProvenance::default();
        assert!(matches!(
            cache.lookup("t", &plan, "sig", "hash", &mut prov).await,
            ExactLookup::Bypass
        ));
        assert!(!prov.enabled);
        assert!(prov.hit.is_none());

        let mut prov = ExactProvenance::default();
        cache
            .store("t", &plan, "sig", "hash", &response(), &mut prov)
            .await;
        assert_eq!(prov.stored, Some(false));
        assert_eq!(kv.get_bytes("exact:t:sig:hash").await.unwrap(), None);
    }

    #[tokio::test]
    async fn probes_bump_hit_and_miss_counters() {
        let kv = Arc::new(MemoryKvCache::new());
        let cache = ResponseCache::new(kv.clone(), Duration::from_secs(300));
        let plan = plan(true);

        let mut prov = ExactProvenance::default();
        cache.lookup("t", &plan, "sig", "hash", &mut prov).await;
        cache
            .store("t", &plan, "sig", "hash", &response(), &mut prov)
            .await;
        cache.lookup("t", &plan, "sig", "hash", &mut prov).await;

        assert_eq!(kv.incr("metrics:cache_exact_miss:t").await.unwrap(), 2);
        assert_eq!(kv.incr("metrics:cache_exact_hit:t").await.unwrap(), 2);
    }
}
