//! Structured record of what the cache layer and scheduler did for one
//! request. Serialized into the trace as `cache_json`; consumers key on
//! `exact.hit` / `semantic.hit`, so field names are part of the contract.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheProvenance {
    pub exact: ExactProvenance,
    pub semantic: SemanticProvenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerProvenance>,
}

/// What the exact tier did on this request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExactProvenance {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_sig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    /// Set when the store was unreachable; the request proceeded as a miss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the semantic tier did. On a below-threshold candidate the best
/// entry and similarity are still recorded for threshold tuning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SemanticProvenance {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_sig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scheduler-side outcome, filled once the request reaches admission.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerProvenance {
    pub lane: String,
    pub admission: String,
    pub predicted_wait_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_wait_ms: Option<u64>,
    pub degraded: bool,
    pub rejected: bool,
}
