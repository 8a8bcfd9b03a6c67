//! Predictive admission control.
//!
//! A pure, non-blocking decision over the current queue depth and the
//! policy's fixed per-lane compute estimates. Queue depth is read under the
//! scheduler lock; no I/O happens here.

use serde::Serialize;

use super::{Lane, Scheduler};

/// First matching rule of the decision ladder, with its reason string.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    pub outcome: AdmissionOutcome,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Accepted,
    /// The caller scales the plan's `max_tokens` down to fit the SLO.
    Degraded,
    Rejected { retry_after_seconds: u64 },
}

impl AdmissionDecision {
    pub fn is_degraded(&self) -> bool {
        self.outcome == AdmissionOutcome::Degraded
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, AdmissionOutcome::Rejected { .. })
    }
}

impl Scheduler {
    /// Predict queue wait for the lane and decide accept / degrade / reject
    /// against the tenant's SLO. Returns the decision and the predicted
    /// wait in milliseconds.
    pub fn admission_check(&self, lane: Lane, tenant_slo_ms: u64) -> (AdmissionDecision, u64) {
        let adm = &self.config().admission;
        if !adm.enabled {
            return (
                AdmissionDecision {
                    outcome: AdmissionOutcome::Accepted,
                    reason: "admission_disabled",
                },
                0,
            );
        }

        let workers = self.config().workers.max(1) as u64;
        let avg_compute = match lane {
            Lane::Short => adm.default_compute_ms.short,
            Lane::Long => adm.default_compute_ms.long,
        };

        let depth = self.queue_depth(lane) as u64;
        let predicted_wait_ms = depth * avg_compute / workers;
        let predicted_total_ms = predicted_wait_ms + avg_compute;

        if predicted_total_ms <= tenant_slo_ms {
            return (
                AdmissionDecision {
                    outcome: AdmissionOutcome::Accepted,
                    reason: "within_slo",
                },
                predicted_wait_ms,
            );
        }

        if adm.degrade.enabled {
            return (
                AdmissionDecision {
                    outcome: AdmissionOutcome::Degraded,
                    reason: "degrade_to_meet_slo",
                },
                predicted_wait_ms,
            );
        }

        if adm.reject.enabled {
            return (
                AdmissionDecision {
                    outcome: AdmissionOutcome::Rejected {
                        retry_after_seconds: adm.reject.retry_after_seconds,
                    },
                    reason: "reject_predicted_slo_miss",
                },
                predicted_wait_ms,
            );
        }

        (
            AdmissionDecision {
                outcome: AdmissionOutcome::Accepted,
                reason: "accept_even_if_slo_miss",
            },
            predicted_wait_ms,
        )
    }
}

/// Scale `max_tokens` down for a degraded plan:
/// `max(floor, floor(max_tokens * scale))`.
pub fn degraded_max_tokens(max_tokens: u32, floor: u32, scale: f64) -> u32 {
    let scaled = (f64::from(max_tokens) * scale).floor() as u32;
    scaled.max(floor)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use chrono::Utc;
    use rstest::rstest;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{SchedulerConfig, TenantCaching},
        plan::ExecutionPlan,
        scheduler::ScheduledJob,
    };

    fn scheduler(configure: impl FnOnce(&mut SchedulerConfig)) -> Arc<Scheduler> {
        let mut config = SchedulerConfig::default();
        configure(&mut config);
        Scheduler::new(config)
    }

    fn enqueue(scheduler: &Scheduler, lane: Lane, count: usize) {
        for _ in 0..count {
            let (tx, rx) = oneshot::channel();
            // Keep the receiver alive for the scheduler's lifetime.
            std::mem::forget(rx);
            scheduler
                .submit(ScheduledJob {
                    request_id: Uuid::new_v4(),
                    tenant_id: "t".to_string(),
                    lane,
                    created_at: Utc::now(),
                    slo_ms: 8000,
                    plan: ExecutionPlan {
                        plan_name: "short".to_string(),
                        tier: "standard".to_string(),
                        decoding_profile: "standard".to_string(),
                        max_tokens: 64,
                        temperature: 0.7,
                        cache: TenantCaching::default(),
                    },
                    run: Box::new(|| Box::pin(async { Ok(Default::default()) })),
                    completion: tx,
                    queue_entered_at: Instant::now(),
                })
                .unwrap();
        }
    }

    #[test]
    fn disabled_admission_always_accepts() {
        let s = scheduler(|c| c.admission.enabled = false);
        let (decision, wait) = s.admission_check(Lane::Short, 1);
        assert_eq!(decision.reason, "admission_disabled");
        assert_eq!(decision.outcome, AdmissionOutcome::Accepted);
        assert_eq!(wait, 0);
    }

    #[test]
    fn empty_queue_within_slo_accepts() {
        let s = scheduler(|c| {
            c.workers = 2;
            c.admission.default_compute_ms.short = 1200;
        });
        let (decision, wait) = s.admission_check(Lane::Short, 8000);
        assert_eq!(decision.reason, "within_slo");
        assert_eq!(wait, 0);
    }

    #[tokio::test]
    async fn predicted_wait_scales_with_depth_over_workers() {
        let s = scheduler(|c| {
            c.workers = 2;
            c.admission.default_compute_ms.short = 1000;
        });
        enqueue(&s, Lane::Short, 4);
        let (_, wait) = s.admission_check(Lane::Short, 60_000);
        assert_eq!(wait, 4 * 1000 / 2);
    }

    #[tokio::test]
    async fn slo_miss_prefers_degrade_over_reject() {
        let s = scheduler(|c| {
            c.workers = 2;
            c.admission.default_compute_ms.short = 1200;
        });
        // Even an empty queue predicts 1200ms total against a 1000ms SLO.
        let (decision, _) = s.admission_check(Lane::Short, 1000);
        assert_eq!(decision.reason, "degrade_to_meet_slo");
        assert!(decision.is_degraded());
    }

    #[tokio::test]
    async fn reject_carries_the_policy_retry_hint() {
        let s = scheduler(|c| {
            c.admission.default_compute_ms.short = 1200;
            c.admission.degrade.enabled = false;
            c.admission.reject.retry_after_seconds = 7;
        });
        let (decision, _) = s.admission_check(Lane::Short, 1000);
        assert_eq!(decision.reason, "reject_predicted_slo_miss");
        assert_eq!(
            decision.outcome,
            AdmissionOutcome::Rejected {
                retry_after_seconds: 7
            }
        );
    }

    #[tokio::test]
    async fn everything_disabled_accepts_past_the_slo() {
        let s = scheduler(|c| {
            c.admission.default_compute_ms.short = 1200;
            c.admission.degrade.enabled = false;
            c.admission.reject.enabled = false;
        });
        let (decision, _) = s.admission_check(Lane::Short, 1000);
        assert_eq!(decision.reason, "accept_even_if_slo_miss");
    }

    #[tokio::test]
    async fn long_lane_uses_its_own_estimate() {
        let s = scheduler(|c| {
            c.workers = 1;
            c.admission.default_compute_ms.short = 100;
            c.admission.default_compute_ms.long = 5000;
        });
        let (short, _) = s.admission_check(Lane::Short, 1000);
        let (long, _) = s.admission_check(Lane::Long, 1000);
        assert_eq!(short.reason, "within_slo");
        assert_eq!(long.reason, "degrade_to_meet_slo");
    }

    /// Increasing depth never flips a decision back toward accept.
    #[tokio::test]
    async fn decisions_are_monotone_in_depth() {
        let severity = |d: &AdmissionDecision| match d.outcome {
            AdmissionOutcome::Accepted => 0,
            AdmissionOutcome::Degraded => 1,
            AdmissionOutcome::Rejected { .. } => 1,
        };

        let s = scheduler(|c| {
            c.workers = 1;
            c.admission.default_compute_ms.short = 500;
        });
        let mut last = 0;
        for depth in 0..20 {
            if depth > 0 {
                enqueue(&s, Lane::Short, 1);
            }
            let (decision, _) = s.admission_check(Lane::Short, 3000);
            let now = severity(&decision);
            assert!(now >= last, "decision relaxed at depth {depth}");
            last = now;
        }
    }

    #[rstest]
    #[case(400, 128, 0.5, 200)]
    #[case(100, 128, 0.5, 128)]
    #[case(1000, 1, 0.25, 250)]
    #[case(3, 128, 0.5, 128)]
    fn degrade_scales_with_a_floor(
        #[case] max_tokens: u32,
        #[case] floor: u32,
        #[case] scale: f64,
        #[case] expected: u32,
    ) {
        assert_eq!(degraded_max_tokens(max_tokens, floor, scale), expected);
    }
}
