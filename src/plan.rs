//! Policy engine: turn a tenant id and prompt length into an execution plan.
//!
//! Planning is a pure function of the policy document and its inputs. The
//! returned [`DecisionTrace`] starts with the bucket and tenant resolution
//! reasons; later stages (admission control) append to it, never rewrite it.

use serde::Serialize;

use crate::config::{PolicyConfig, TenantCaching};

/// Immutable value describing how one request will be executed. The serde
/// layout matters: the plan's sorted-key JSON serialization is hashed into
/// the plan signature that partitions both cache tiers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    /// Name of the length bucket the plan was selected from.
    pub plan_name: String,
    pub tier: String,
    pub decoding_profile: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// The tenant's effective caching block, copied verbatim.
    pub cache: TenantCaching,
}

/// Append-only record of why the plan looks the way it does.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrace {
    pub reasons: Vec<String>,
    pub bucket: String,
    pub tenant_id: String,
    pub policy_version: String,
}

impl DecisionTrace {
    pub fn push_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }
}

/// Pick the length bucket for a prompt: the first of `short`, `medium`,
/// `long` (in that order) whose `max_chars` accommodates the prompt, with
/// `long` as the catch-all.
fn pick_length_bucket(policy: &PolicyConfig, prompt_chars: usize) -> &'static str {
    for name in ["short", "medium", "long"] {
        if let Some(bucket) = policy.routing.length_buckets.get(name)
            && prompt_chars <= bucket.max_chars
        {
            return name;
        }
    }
    "long"
}

/// Build the execution plan for one request.
///
/// Request-level `temperature`/`max_tokens` overrides replace the plan
/// values as-is; range enforcement happens at ingress and clamping under
/// pressure is the admission controller's job.
pub fn build_plan(
    policy: &PolicyConfig,
    tenant_id: &str,
    prompt_chars: usize,
    override_temperature: Option<f64>,
    override_max_tokens: Option<u32>,
) -> (ExecutionPlan, DecisionTrace) {
    let tenant = policy.tenant(tenant_id);
    let bucket = pick_length_bucket(policy, prompt_chars);

    let fallback = crate::config::PlanConfig::default();
    let plan_cfg = policy
        .plans
        .get(bucket)
        .or_else(|| policy.plans.get("short"))
        .unwrap_or(&fallback);

    let plan = ExecutionPlan {
        plan_name: bucket.to_string(),
        tier: plan_cfg.tier.clone(),
        decoding_profile: plan_cfg.decoding_profile.clone(),
        max_tokens: override_max_tokens.unwrap_or(plan_cfg.max_tokens),
        temperature: override_temperature.unwrap_or(plan_cfg.temperature),
        cache: tenant.caching.clone(),
    };

    let trace = DecisionTrace {
        reasons: vec![
            format!("bucket={bucket} (prompt_chars={prompt_chars})"),
            format!("tenant={tenant_id}"),
            "plan selected from policy.plans[bucket]".to_string(),
        ],
        bucket: bucket.to_string(),
        tenant_id: tenant_id.to_string(),
        policy_version: policy.policy_version.clone(),
    };

    (plan, trace)
}
