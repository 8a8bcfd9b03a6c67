//! Two-lane fair scheduler with a fixed worker pool.
//!
//! Jobs are queued per `(lane, tenant)` FIFO. Workers prefer the short lane
//! and rotate across tenants within a lane from a round-robin cursor, so a
//! chatty tenant cannot starve the others. A single lock guards the queues,
//! the rotation order, and depth reads; it is held only for in-memory
//! operations and never across a backend call.

pub mod admission;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    backend::{BackendError, GenerationResult},
    config::SchedulerConfig,
    plan::ExecutionPlan,
};

/// Idle workers poll the queues at this interval.
const IDLE_POLL: std::time::Duration = std::time::Duration::from_millis(5);

pub type JobResult = Result<GenerationResult, BackendError>;
pub type JobFuture = futures::future::BoxFuture<'static, JobResult>;
pub type JobFn = Box<dyn FnOnce() -> JobFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Short,
    Long,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Short => "short",
            Lane::Long => "long",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of backend work, owned by the scheduler from submit until its
/// completion promise is settled.
pub struct ScheduledJob {
    pub request_id: Uuid,
    pub tenant_id: String,
    pub lane: Lane,
    pub created_at: DateTime<Utc>,
    pub slo_ms: u64,
    pub plan: ExecutionPlan,
    /// Invoked by a worker; captures everything the backend call needs.
    pub run: JobFn,
    /// Settled exactly once by the worker. Dropping the receiver cancels
    /// the job if a worker has not dispatched it yet.
    pub completion: oneshot::Sender<JobResult>,
    pub queue_entered_at: Instant,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{lane} queue full")]
    QueueFull { lane: Lane },
}

#[derive(Default)]
struct LaneQueues {
    queues: HashMap<String, VecDeque<ScheduledJob>>,
    /// Tenants in first-submission order; never shrinks.
    rr_order: Vec<String>,
    rr_index: usize,
}

impl LaneQueues {
    fn depth(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    fn push(&mut self, job: ScheduledJob) {
        let tenant = job.tenant_id.clone();
        if !self.queues.contains_key(&tenant) {
            self.queues.insert(tenant.clone(), VecDeque::new());
            self.rr_order.push(tenant.clone());
        }
        self.queues
            .get_mut(&tenant)
            .expect("queue created above")
            .push_back(job);
    }

    /// Starting at the cursor, return the head of the first non-empty
    /// tenant queue and advance the cursor past it.
    fn pop_fair(&mut self) -> Option<ScheduledJob> {
        let n = self.rr_order.len();
        if n == 0 {
            return None;
        }
        let start = self.rr_index % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let tenant = &self.rr_order[idx];
            if let Some(job) = self.queues.get_mut(tenant).and_then(|q| q.pop_front()) {
                self.rr_index = idx + 1;
                return Some(job);
            }
        }
        None
    }
}

struct SchedulerState {
    short: LaneQueues,
    long: LaneQueues,
}

impl SchedulerState {
    fn lane(&self, lane: Lane) -> &LaneQueues {
        match lane {
            Lane::Short => &self.short,
            Lane::Long => &self.long,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneQueues {
        match lane {
            Lane::Short => &mut self.short,
            Lane::Long => &mut self.long,
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(SchedulerState {
                short: LaneQueues::default(),
                long: LaneQueues::default(),
            }),
            workers: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the worker pool.
    pub fn start(self: Arc<Self>) {
        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.workers {
            let scheduler = Arc::clone(&self);
            workers.push(tokio::spawn(scheduler.worker_loop(worker_id)));
        }
        drop(workers);
        info!(workers = self.config.workers, "scheduler started");
    }

    /// Signal workers to stop and wait for them to exit. In-flight jobs may
    /// observe cancellation and leave their promises unresolved; the
    /// boundary layer times those out.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }

    pub fn lane_for_prompt_chars(&self, prompt_chars: usize) -> Lane {
        if prompt_chars <= self.config.short_max_prompt_chars {
            Lane::Short
        } else {
            Lane::Long
        }
    }

    /// Total queued jobs in a lane across all tenants.
    pub fn queue_depth(&self, lane: Lane) -> usize {
        self.state.lock().lane(lane).depth()
    }

    /// Enqueue a job, lazily creating its tenant queue. Fails when the lane
    /// is at `max_queue_depth_per_lane` summed across tenants.
    pub fn submit(&self, job: ScheduledJob) -> Result<(), SchedulerError> {
        let lane = job.lane;
        let mut state = self.state.lock();
        let queues = state.lane_mut(lane);
        if queues.depth() >= self.config.max_queue_depth_per_lane {
            return Err(SchedulerError::QueueFull { lane });
        }
        queues.push(job);
        Ok(())
    }

    /// Short lane first, then long; round-robin across tenants inside the
    /// chosen lane.
    fn dequeue_fair(&self) -> Option<ScheduledJob> {
        let mut state = self.state.lock();
        state.short.pop_fair().or_else(|| state.long.pop_fair())
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "worker started");
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let Some(job) = self.dequeue_fair() else {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => continue,
                }
            };

            if job.completion.is_closed() {
                debug!(
                    worker_id,
                    request_id = %job.request_id,
                    "dropping cancelled job before dispatch"
                );
                continue;
            }

            debug!(
                worker_id,
                request_id = %job.request_id,
                tenant_id = %job.tenant_id,
                lane = %job.lane,
                plan = %job.plan.plan_name,
                slo_ms = job.slo_ms,
                created_at = %job.created_at,
                queued_ms = job.queue_entered_at.elapsed().as_millis() as u64,
                "job dispatched"
            );

            // The lock is never held here: run() is the backend call.
            let result = (job.run)().await;
            let _ = job.completion.send(result);
        }
        debug!(worker_id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::TenantCaching;

    fn test_plan() -> ExecutionPlan {
        ExecutionPlan {
            plan_name: "short".to_string(),
            tier: "standard".to_string(),
            decoding_profile: "standard".to_string(),
            max_tokens: 64,
            temperature: 0.7,
            cache: TenantCaching::default(),
        }
    }

    fn job(
        tenant: &str,
        lane: Lane,
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> (ScheduledJob, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        let job = ScheduledJob {
            request_id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            lane,
            created_at: Utc::now(),
            slo_ms: 8000,
            plan: test_plan(),
            run: Box::new(move || {
                Box::pin(async move {
                    order.lock().push(label);
                    Ok(GenerationResult {
                        text: label.to_string(),
                        ..GenerationResult::default()
                    })
                })
            }),
            completion: tx,
            queue_entered_at: Instant::now(),
        };
        (job, rx)
    }

    fn scheduler_config(workers: usize, max_depth: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            max_queue_depth_per_lane: max_depth,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn lane_choice_uses_the_configured_cutoff() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.lane_for_prompt_chars(0), Lane::Short);
        assert_eq!(scheduler.lane_for_prompt_chars(1200), Lane::Short);
        assert_eq!(scheduler.lane_for_prompt_chars(1201), Lane::Long);
    }

    #[tokio::test]
    async fn dequeue_is_round_robin_across_tenants() {
        let scheduler = Scheduler::new(scheduler_config(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (a1, _r1) = job("a", Lane::Short, "a1", order.clone());
        let (a2, _r2) = job("a", Lane::Short, "a2", order.clone());
        let (b1, _r3) = job("b", Lane::Short, "b1", order.clone());
        scheduler.submit(a1).unwrap();
        scheduler.submit(a2).unwrap();
        scheduler.submit(b1).unwrap();

        let mut served = Vec::new();
        while let Some(job) = scheduler.dequeue_fair() {
            served.push(job.tenant_id.clone());
        }
        assert_eq!(served, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn every_tenant_finishes_round_i_before_round_i_plus_one() {
        let scheduler = Scheduler::new(scheduler_config(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));
        let tenants = ["a", "b", "c"];
        let rounds = 4;

        let mut receivers = Vec::new();
        for tenant in tenants {
            for _ in 0..rounds {
                let (j, r) = job(tenant, Lane::Short, "x", order.clone());
                scheduler.submit(j).unwrap();
                receivers.push(r);
            }
        }

        let mut served: Vec<String> = Vec::new();
        while let Some(job) = scheduler.dequeue_fair() {
            served.push(job.tenant_id.clone());
        }

        // Service order is round-robin: each window of N holds each tenant once.
        for window in served.chunks(tenants.len()) {
            let mut sorted: Vec<_> = window.to_vec();
            sorted.sort();
            assert_eq!(sorted, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn short_lane_has_strict_priority() {
        let scheduler = Scheduler::new(scheduler_config(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (long1, _r1) = job("a", Lane::Long, "long1", order.clone());
        let (short1, _r2) = job("b", Lane::Short, "short1", order.clone());
        scheduler.submit(long1).unwrap();
        scheduler.submit(short1).unwrap();

        assert_eq!(scheduler.dequeue_fair().unwrap().lane, Lane::Short);
        assert_eq!(scheduler.dequeue_fair().unwrap().lane, Lane::Long);
    }

    #[tokio::test]
    async fn queue_full_fails_the_excess_submit() {
        let scheduler = Scheduler::new(scheduler_config(1, 2));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Depth cap is per lane across tenants.
        let (j1, _r1) = job("a", Lane::Short, "1", order.clone());
        let (j2, _r2) = job("b", Lane::Short, "2", order.clone());
        let (j3, _r3) = job("c", Lane::Short, "3", order.clone());
        scheduler.submit(j1).unwrap();
        scheduler.submit(j2).unwrap();
        let err = scheduler.submit(j3).unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { lane: Lane::Short }));

        // The long lane is unaffected.
        let (j4, _r4) = job("a", Lane::Long, "4", order.clone());
        scheduler.submit(j4).unwrap();
    }

    #[tokio::test]
    async fn single_worker_serves_interleaved_tenants_fairly() {
        let scheduler = Scheduler::new(scheduler_config(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (a1, r1) = job("a", Lane::Short, "a1", order.clone());
        let (a2, r2) = job("a", Lane::Short, "a2", order.clone());
        let (b1, r3) = job("b", Lane::Short, "b1", order.clone());
        scheduler.submit(a1).unwrap();
        scheduler.submit(a2).unwrap();
        scheduler.submit(b1).unwrap();

        scheduler.clone().start();
        let (ra, rb, rc) = tokio::join!(r1, r2, r3);
        scheduler.stop().await;

        assert_eq!(ra.unwrap().unwrap().text, "a1");
        assert_eq!(rb.unwrap().unwrap().text, "a2");
        assert_eq!(rc.unwrap().unwrap().text, "b1");
        assert_eq!(*order.lock(), vec!["a1", "b1", "a2"]);
    }

    #[tokio::test]
    async fn cancelled_jobs_are_dropped_before_dispatch() {
        let scheduler = Scheduler::new(scheduler_config(1, 100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (cancelled, rx) = job("a", Lane::Short, "cancelled", order.clone());
        scheduler.submit(cancelled).unwrap();
        drop(rx);

        let (live, live_rx) = job("a", Lane::Short, "live", order.clone());
        scheduler.submit(live).unwrap();

        scheduler.clone().start();
        live_rx.await.unwrap().unwrap();
        scheduler.stop().await;

        assert_eq!(*order.lock(), vec!["live"]);
    }

    #[tokio::test]
    async fn stop_terminates_idle_workers() {
        let scheduler = Scheduler::new(scheduler_config(2, 100));
        scheduler.clone().start();
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .expect("stop should not hang");
    }
}
