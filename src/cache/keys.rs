//! Cache key construction and the plan signature.
//!
//! Every key is partitioned by tenant and plan signature, so a cached
//! response can never leak across tenants or across plans that differ in
//! any field.

use sha2::{Digest, Sha256};

use crate::plan::ExecutionPlan;

/// Number of hex chars kept from the plan digest.
const PLAN_SIG_LEN: usize = 16;

/// 16-hex-char digest of the plan's sorted-key JSON serialization.
///
/// Serializing through `serde_json::Value` sorts object keys at every level
/// (its map type is a `BTreeMap`), so two plans that are byte-identical
/// modulo key order share a signature.
pub fn plan_signature(plan: &ExecutionPlan) -> String {
    let value = serde_json::to_value(plan).expect("plan serialization is infallible");
    let canonical = serde_json::to_string(&value).expect("value serialization is infallible");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..PLAN_SIG_LEN].to_string()
}

pub struct CacheKeys;

impl CacheKeys {
    /// Exact response cache: `exact:{tenant}:{plan_sig}:{request_hash}`.
    /// Strict byte equality; no normalization beyond the normalizer's.
    pub fn exact_response(tenant_id: &str, plan_sig: &str, request_hash: &str) -> String {
        format!("exact:{tenant_id}:{plan_sig}:{request_hash}")
    }

    /// Exact-probe hit counter: `metrics:cache_exact_hit:{tenant}`.
    pub fn exact_hit_counter(tenant_id: &str) -> String {
        format!("metrics:cache_exact_hit:{tenant_id}")
    }

    /// Exact-probe miss counter: `metrics:cache_exact_miss:{tenant}`.
    pub fn exact_miss_counter(tenant_id: &str) -> String {
        format!("metrics:cache_exact_miss:{tenant_id}")
    }
}
