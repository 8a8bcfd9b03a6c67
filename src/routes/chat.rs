//! The chat-completions endpoint: the full request lifecycle.
//!
//! Normalize → plan → exact probe → semantic probe → admission → (degrade)
//! → scheduler submit → await completion → store caches → trace → respond.
//! Every terminal outcome writes exactly one trace row whose status code
//! matches the HTTP response.

use std::time::Instant;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api_types::{ChatCompletionsRequest, ChatCompletionsResponse, Usage},
    backend::BackendError,
    cache::{CacheProvenance, ExactLookup, SchedulerProvenance, SemanticLookup, plan_signature},
    plan::{DecisionTrace, ExecutionPlan, build_plan},
    scheduler::{
        JobFn, Lane, ScheduledJob, SchedulerError,
        admission::{AdmissionOutcome, degraded_max_tokens},
    },
    trace::TraceRecord,
};

const ENDPOINT: &str = "/v1/chat/completions";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimited { retry_after_seconds: u64 },
    QueueFull,
    Backend(BackendError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"detail": detail})),
            )
                .into_response(),
            ApiError::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "detail": {"retry_after_seconds": retry_after_seconds}
                })),
            )
                .into_response(),
            ApiError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"detail": "Queue full, try later"})),
            )
                .into_response(),
            ApiError::Backend(err) => (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"detail": err.to_string()})),
            )
                .into_response(),
            ApiError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": detail})),
            )
                .into_response(),
        }
    }
}

/// Fields shared by every trace row a request can produce.
struct TraceCtx {
    request_id: Uuid,
    tenant_id: String,
    model: String,
    request_hash: String,
    request_json: serde_json::Value,
    policy_version: String,
    started: Instant,
}

impl TraceCtx {
    fn base(
        &self,
        status_code: u16,
        plan: &ExecutionPlan,
        decision: &DecisionTrace,
        cache: &CacheProvenance,
    ) -> TraceRecord {
        TraceRecord {
            request_id: self.request_id.to_string(),
            tenant_id: self.tenant_id.clone(),
            endpoint: ENDPOINT.to_string(),
            model: self.model.clone(),
            status_code,
            request_hash: self.request_hash.clone(),
            latency_ms: self.started.elapsed().as_millis() as u64,
            backend_latency_ms: None,
            queue_wait_ms: None,
            backend_ttft_ms: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            request_json: self.request_json.clone(),
            response_json: serde_json::Value::Null,
            error_json: serde_json::Value::Null,
            policy_version: self.policy_version.clone(),
            plan_json: serde_json::to_value(plan).unwrap_or(serde_json::Value::Null),
            decision_trace_json: serde_json::to_value(decision).unwrap_or(serde_json::Value::Null),
            cache_json: serde_json::to_value(cache).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Trace writes never fail the request.
async fn write_trace(state: &AppState, record: TraceRecord) {
    if let Err(e) = state.traces.insert_trace(record).await {
        error!(error = %e, "trace write failed");
    }
}

fn attach_usage(record: &mut TraceRecord, response: &ChatCompletionsResponse) {
    record.prompt_tokens = Some(response.usage.prompt_tokens);
    record.completion_tokens = Some(response.usage.completion_tokens);
    record.total_tokens = Some(response.usage.total_tokens);
    record.response_json = serde_json::to_value(response).unwrap_or(serde_json::Value::Null);
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionsRequest>,
) -> Result<Json<ChatCompletionsResponse>, ApiError> {
    if req.stream {
        return Err(ApiError::BadRequest(
            "stream=true is not supported".to_string(),
        ));
    }
    if let Some(t) = req.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(ApiError::BadRequest(format!(
            "temperature {t} outside [0, 2]"
        )));
    }
    if req.max_tokens == Some(0) {
        return Err(ApiError::BadRequest(
            "max_tokens must be at least 1".to_string(),
        ));
    }

    let tenant_id = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();

    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let policy = &state.policy;
    let tenant_policy = policy.tenant(&tenant_id);

    let normalized = crate::normalize::normalize_messages(&req.messages);
    let prompt_chars = normalized.prompt_chars();

    let (mut plan, mut decision) = build_plan(
        policy,
        &tenant_id,
        prompt_chars,
        req.temperature,
        req.max_tokens,
    );
    let mut sig = plan_signature(&plan);

    let ctx = TraceCtx {
        request_id,
        tenant_id: tenant_id.clone(),
        model: req.model.clone(),
        request_hash: normalized.request_hash.clone(),
        request_json: serde_json::to_value(&req).unwrap_or(serde_json::Value::Null),
        policy_version: policy.policy_version.clone(),
        started,
    };

    let mut cache_info = CacheProvenance::default();

    // Tier 1: exact match.
    if let ExactLookup::Hit(response) = state
        .response_cache
        .lookup(&tenant_id, &plan, &sig, &normalized.request_hash, &mut cache_info.exact)
        .await
    {
        let mut record = ctx.base(200, &plan, &decision, &cache_info);
        attach_usage(&mut record, &response);
        let latency_ms = record.latency_ms;
        write_trace(&state, record).await;
        info!(
            request_id = %request_id,
            tenant_id = %tenant_id,
            latency_ms,
            request_hash = %normalized.request_hash,
            "exact cache hit"
        );
        return Ok(Json(response));
    }

    // Tier 2: semantic nearest-neighbor.
    if let SemanticLookup::Hit {
        response,
        similarity,
        entry_id,
    } = state
        .semantic_cache
        .lookup(&tenant_id, &plan, &sig, &normalized, &mut cache_info.semantic)
        .await
    {
        let mut record = ctx.base(200, &plan, &decision, &cache_info);
        attach_usage(&mut record, &response);
        write_trace(&state, record).await;
        info!(
            request_id = %request_id,
            tenant_id = %tenant_id,
            similarity,
            entry_id = %entry_id,
            "semantic cache hit"
        );
        return Ok(Json(response));
    }

    // Admission control against the tenant's SLO.
    let lane = state.scheduler.lane_for_prompt_chars(prompt_chars);
    let (admission, predicted_wait_ms) = state
        .scheduler
        .admission_check(lane, tenant_policy.latency_slo_ms);

    let mut degraded = false;
    if admission.is_degraded() {
        degraded = true;
        let cfg = &policy.scheduler.admission.degrade;
        plan.max_tokens =
            degraded_max_tokens(plan.max_tokens, cfg.max_tokens_floor, cfg.max_tokens_scale);
        decision.push_reason(format!(
            "degraded max_tokens to {} due to admission control",
            plan.max_tokens
        ));
        // The degraded plan is the one that runs; cached responses must not
        // leak between degraded and full plans.
        sig = plan_signature(&plan);
    }

    if let AdmissionOutcome::Rejected {
        retry_after_seconds,
    } = admission.outcome
    {
        cache_info.scheduler = Some(SchedulerProvenance {
            lane: lane.as_str().to_string(),
            admission: admission.reason.to_string(),
            predicted_wait_ms,
            queue_wait_ms: None,
            degraded,
            rejected: true,
        });
        let mut record = ctx.base(429, &plan, &decision, &cache_info);
        record.queue_wait_ms = Some(predicted_wait_ms);
        record.error_json = serde_json::json!({
            "type": "rate_limited",
            "detail": "Predicted SLO miss; retry later",
            "retry_after_seconds": retry_after_seconds,
        });
        write_trace(&state, record).await;
        warn!(
            request_id = %request_id,
            tenant_id = %tenant_id,
            predicted_wait_ms,
            "admission rejected"
        );
        return Err(ApiError::RateLimited {
            retry_after_seconds,
        });
    }

    // Hand the backend call to the scheduler and wait on its promise.
    let prompt = normalized.canonical_text.clone();
    let backend = state.backend.clone();
    let backend_model = state.config.backend.model.clone();
    let temperature = plan.temperature;
    let max_tokens = plan.max_tokens;
    let run: JobFn = Box::new(move || {
        Box::pin(async move {
            backend
                .generate(&backend_model, &prompt, temperature, max_tokens)
                .await
        })
    });

    let (completion, receiver) = oneshot::channel();
    let queue_entered = Instant::now();
    let job = ScheduledJob {
        request_id,
        tenant_id: tenant_id.clone(),
        lane,
        created_at: chrono::Utc::now(),
        slo_ms: tenant_policy.latency_slo_ms,
        plan: plan.clone(),
        run,
        completion,
        queue_entered_at: queue_entered,
    };

    if let Err(SchedulerError::QueueFull { lane }) = state.scheduler.submit(job) {
        cache_info.scheduler = Some(SchedulerProvenance {
            lane: lane.as_str().to_string(),
            admission: "queue_full".to_string(),
            predicted_wait_ms,
            queue_wait_ms: None,
            degraded,
            rejected: true,
        });
        let mut record = ctx.base(503, &plan, &decision, &cache_info);
        record.queue_wait_ms = Some(predicted_wait_ms);
        record.error_json = serde_json::json!({
            "type": "queue_full",
            "detail": "Queue full, try later",
        });
        write_trace(&state, record).await;
        warn!(request_id = %request_id, tenant_id = %tenant_id, %lane, "queue full");
        return Err(ApiError::QueueFull);
    }

    let result = match receiver.await {
        Ok(Ok(result)) => result,
        Ok(Err(backend_err)) => {
            cache_info.scheduler = Some(scheduler_provenance(
                lane,
                admission.reason,
                predicted_wait_ms,
                None,
                degraded,
            ));
            let mut record = ctx.base(502, &plan, &decision, &cache_info);
            record.error_json = serde_json::json!({
                "type": "backend_error",
                "detail": backend_err.to_string(),
            });
            write_trace(&state, record).await;
            error!(request_id = %request_id, error = %backend_err, "backend call failed");
            return Err(ApiError::Backend(backend_err));
        }
        Err(_) => {
            // Worker pool went away mid-flight (shutdown).
            let mut record = ctx.base(500, &plan, &decision, &cache_info);
            record.error_json = serde_json::json!({
                "type": "backend_error",
                "detail": "scheduler dropped the completion promise",
            });
            write_trace(&state, record).await;
            return Err(ApiError::Internal(
                "request was cancelled during shutdown".to_string(),
            ));
        }
    };

    // Queue wait is total promise wait minus the backend's own latency.
    let waited_ms = queue_entered.elapsed().as_millis() as u64;
    let queue_wait_ms = waited_ms.saturating_sub(result.backend_latency_ms.unwrap_or(0));

    cache_info.scheduler = Some(scheduler_provenance(
        lane,
        admission.reason,
        predicted_wait_ms,
        Some(queue_wait_ms),
        degraded,
    ));

    let assistant_text = if result.text.is_empty() {
        "(empty response)".to_string()
    } else {
        result.text.clone()
    };
    let response = ChatCompletionsResponse::assistant(
        request_id.to_string(),
        chrono::Utc::now().timestamp(),
        req.model.clone(),
        assistant_text,
        Usage {
            prompt_tokens: result.prompt_tokens.unwrap_or(0),
            completion_tokens: result.completion_tokens.unwrap_or(0),
            total_tokens: result.total_tokens.unwrap_or(0),
        },
    );

    // Store into every enabled tier; failures are provenance, not errors.
    state
        .semantic_cache
        .store(&tenant_id, &plan, &sig, &normalized, &response, &mut cache_info.semantic)
        .await;
    state
        .response_cache
        .store(
            &tenant_id,
            &plan,
            &sig,
            &normalized.request_hash,
            &response,
            &mut cache_info.exact,
        )
        .await;

    let mut record = ctx.base(200, &plan, &decision, &cache_info);
    attach_usage(&mut record, &response);
    record.backend_latency_ms = result.backend_latency_ms;
    record.backend_ttft_ms = result.backend_ttft_ms;
    record.queue_wait_ms = Some(queue_wait_ms);
    let latency_ms = record.latency_ms;
    write_trace(&state, record).await;

    info!(
        request_id = %request_id,
        tenant_id = %tenant_id,
        latency_ms,
        queue_wait_ms,
        request_hash = %normalized.request_hash,
        policy_version = %state.policy.policy_version,
        "request complete"
    );

    Ok(Json(response))
}

fn scheduler_provenance(
    lane: Lane,
    admission_reason: &str,
    predicted_wait_ms: u64,
    queue_wait_ms: Option<u64>,
    degraded: bool,
) -> SchedulerProvenance {
    SchedulerProvenance {
        lane: lane.as_str().to_string(),
        admission: admission_reason.to_string(),
        predicted_wait_ms,
        queue_wait_ms,
        degraded,
        rejected: false,
    }
}
