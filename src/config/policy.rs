//! Tenant policy schema.
//!
//! The policy document drives every planning decision: per-tenant SLOs and
//! caching switches, length-bucket routing, per-bucket execution plans, and
//! the scheduler/admission tuning. Its `policy_version` string is opaque and
//! propagated verbatim into every trace.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Root of the policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub policy_version: String,

    /// Tenant id → policy. Must contain an entry named `default`, which is
    /// the fallback for unknown tenants.
    pub tenants: HashMap<String, TenantPolicy>,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Length-bucket name → plan template.
    #[serde(default)]
    pub plans: HashMap<String, PlanConfig>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl PolicyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let policy: PolicyConfig = serde_yaml::from_str(contents)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Resolve a tenant's policy, falling back to `default` for unknown ids.
    pub fn tenant(&self, tenant_id: &str) -> &TenantPolicy {
        self.tenants
            .get(tenant_id)
            .or_else(|| self.tenants.get("default"))
            .expect("validated policy always has a default tenant")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tenants.contains_key("default") {
            return Err(ConfigError::Validation(
                "policy.tenants must contain an entry named 'default'".into(),
            ));
        }
        for (name, tenant) in &self.tenants {
            let threshold = tenant.caching.semantic.threshold;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Validation(format!(
                    "tenant '{name}': semantic threshold {threshold} outside [0, 1]"
                )));
            }
        }
        for (bucket, plan) in &self.plans {
            if plan.max_tokens < 1 {
                return Err(ConfigError::Validation(format!(
                    "plan '{bucket}': max_tokens must be at least 1"
                )));
            }
            if !(0.0..=2.0).contains(&plan.temperature) {
                return Err(ConfigError::Validation(format!(
                    "plan '{bucket}': temperature {} outside [0, 2]",
                    plan.temperature
                )));
            }
        }
        self.scheduler.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantPolicy {
    /// Latency budget the admission controller holds this tenant to.
    #[serde(default = "default_latency_slo_ms")]
    pub latency_slo_ms: u64,

    #[serde(default)]
    pub caching: TenantCaching,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            latency_slo_ms: default_latency_slo_ms(),
            caching: TenantCaching::default(),
        }
    }
}

fn default_latency_slo_ms() -> u64 {
    8000
}

/// Per-tenant caching switches. Copied verbatim into each `ExecutionPlan`,
/// so these fields are part of the plan signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantCaching {
    #[serde(default = "default_true")]
    pub exact_enabled: bool,
    #[serde(default)]
    pub semantic: SemanticCaching,
}

impl Default for TenantCaching {
    fn default() -> Self {
        Self {
            exact_enabled: true,
            semantic: SemanticCaching::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticCaching {
    #[serde(default)]
    pub enabled: bool,
    /// Minimum similarity (`1 - cosine_distance`) for a hit.
    #[serde(default = "default_semantic_threshold")]
    pub threshold: f64,
    #[serde(default = "default_semantic_ttl")]
    pub ttl_seconds: u64,
    /// Advisory tag recorded in the trace for semantic hits; opaque here.
    #[serde(default = "default_verifier")]
    pub verifier: String,
}

impl Default for SemanticCaching {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_semantic_threshold(),
            ttl_seconds: default_semantic_ttl(),
            verifier: default_verifier(),
        }
    }
}

fn default_semantic_threshold() -> f64 {
    0.90
}

fn default_semantic_ttl() -> u64 {
    1800
}

fn default_verifier() -> String {
    "off".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Ordered by convention as `short`, `medium`, `long`; bucket selection
    /// iterates those names in that order regardless of map order.
    #[serde(default)]
    pub length_buckets: HashMap<String, LengthBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LengthBucket {
    pub max_chars: usize,
}

/// Plan template for one length bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default = "default_tier")]
    pub decoding_profile: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            tier: default_tier(),
            decoding_profile: default_tier(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_tier() -> String {
    "standard".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Lane cut-off: prompts at or under this many chars ride the short lane.
    #[serde(default = "default_short_max_prompt_chars")]
    pub short_max_prompt_chars: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Cap on total queued jobs per lane, summed across tenants.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth_per_lane: usize,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            short_max_prompt_chars: default_short_max_prompt_chars(),
            workers: default_workers(),
            max_queue_depth_per_lane: default_max_queue_depth(),
            admission: AdmissionConfig::default(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation(
                "scheduler.workers must be at least 1".into(),
            ));
        }
        let degrade = &self.admission.degrade;
        if degrade.max_tokens_floor < 1 {
            return Err(ConfigError::Validation(
                "scheduler.admission.degrade.max_tokens_floor must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&degrade.max_tokens_scale) {
            return Err(ConfigError::Validation(format!(
                "scheduler.admission.degrade.max_tokens_scale {} outside [0, 1]",
                degrade.max_tokens_scale
            )));
        }
        Ok(())
    }
}

fn default_short_max_prompt_chars() -> usize {
    1200
}

fn default_workers() -> usize {
    2
}

fn default_max_queue_depth() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fixed per-lane compute estimates; the controller does not learn.
    #[serde(default)]
    pub default_compute_ms: ComputeEstimates,
    #[serde(default)]
    pub degrade: DegradeConfig,
    #[serde(default)]
    pub reject: RejectConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_compute_ms: ComputeEstimates::default(),
            degrade: DegradeConfig::default(),
            reject: RejectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeEstimates {
    #[serde(default = "default_short_compute_ms")]
    pub short: u64,
    #[serde(default = "default_long_compute_ms")]
    pub long: u64,
}

impl Default for ComputeEstimates {
    fn default() -> Self {
        Self {
            short: default_short_compute_ms(),
            long: default_long_compute_ms(),
        }
    }
}

fn default_short_compute_ms() -> u64 {
    1200
}

fn default_long_compute_ms() -> u64 {
    3500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DegradeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_tokens_floor")]
    pub max_tokens_floor: u32,
    #[serde(default = "default_max_tokens_scale")]
    pub max_tokens_scale: f64,
}

impl Default for DegradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens_floor: default_max_tokens_floor(),
            max_tokens_scale: default_max_tokens_scale(),
        }
    }
}

fn default_max_tokens_floor() -> u32 {
    128
}

fn default_max_tokens_scale() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Advisory hint surfaced to rejected callers.
    #[serde(default = "default_retry_after")]
    pub retry_after_seconds: u64,
}

impl Default for RejectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_after_seconds: default_retry_after(),
        }
    }
}

fn default_retry_after() -> u64 {
    2
}
