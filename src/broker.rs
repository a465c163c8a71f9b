//! Broker (C9): public operations — submit, cancel, query, restore
//! (spec.md §4.4).
//!
//! Binds C4 (quota) to C6/C7 (queues) and restores queue state from C3 on
//! start. Generalizes the public surface the teacher fronts with
//! `job_claim.rs` + `job_processor.rs`, the way `api::server::ApiServer`
//! fronts those.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::domain::{Job, JobId, JobSpec, JobState, Subject};
use crate::error::BrokerError;
use crate::executor::Executor;
use crate::monitoring::Metrics;
use crate::queue::Queues;
use crate::quota::QuotaEvaluator;
use crate::status_bus::{EventKind, StatusBus};
use crate::store::JobStore;

/// Rough per-position latency used only to advertise `estimated_wait` to the
/// submitting client; not used for any admission or ordering decision.
const ESTIMATED_SECONDS_PER_QUEUE_SLOT: u64 = 15;

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job_id: JobId,
    pub position: usize,
    pub estimated_wait: Duration,
}

pub struct Broker {
    job_store: Arc<dyn JobStore>,
    quota: Arc<QuotaEvaluator>,
    status_bus: Arc<StatusBus>,
    queues: Arc<Queues>,
    executor: Arc<Executor>,
    clock: Arc<Clock>,
    metrics: Arc<Metrics>,
}

impl Broker {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        quota: Arc<QuotaEvaluator>,
        status_bus: Arc<StatusBus>,
        queues: Arc<Queues>,
        executor: Arc<Executor>,
        clock: Arc<Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            job_store,
            quota,
            status_bus,
            queues,
            executor,
            clock,
            metrics,
        }
    }

    pub async fn submit(
        &self,
        subject: Subject,
        spec: JobSpec,
    ) -> Result<SubmitOutcome, BrokerError> {
        spec.validate().map_err(BrokerError::InvalidRequest)?;

        let live_count = self.job_store.count_non_terminal(&subject.key).await;
        let queue_len = self.queues.fresh.len();
        if let Err(e) = self.quota.evaluate(&subject, queue_len, live_count).await {
            self.metrics.record_rejection(e.reason.code());
            return Err(BrokerError::AdmissionDenied(e));
        }

        let now = self.clock.now_wall();
        let priority = self.quota.priority_for(subject.tier);
        let job = Job {
            id: self.clock.next_job_id(),
            tier: subject.tier,
            subject,
            submitted_at: now,
            admitted_at: now,
            priority,
            spec,
            state: JobState::Queued,
            attempts: 0,
            result: None,
            error: None,
        };

        self.job_store
            .insert(job.clone())
            .await
            .map_err(BrokerError::Store)?;

        if let Err(_full) = self.queues.fresh.push(job.clone()) {
            self.metrics.record_rejection(crate::quota::AdmissionReason::QueueFull.code());
            return Err(BrokerError::AdmissionDenied(
                crate::quota::AdmissionError {
                    reason: crate::quota::AdmissionReason::QueueFull,
                    retry_after: None,
                },
            ));
        }

        self.status_bus.publish(&job.id, EventKind::Queued, None).await;

        let position = self.queues.fresh.len();
        self.metrics.record_admission(&job.tier.to_string());
        self.metrics.queue_depth.set(position as i64);
        info!(job_id = %job.id, position, "job admitted");

        Ok(SubmitOutcome {
            job_id: job.id,
            position,
            estimated_wait: Duration::from_secs(position as u64 * ESTIMATED_SECONDS_PER_QUEUE_SLOT),
        })
    }

    /// Idempotent with respect to terminal states: returns `true` exactly
    /// once. A subject may only cancel its own jobs; mismatches behave like
    /// "nothing to cancel" rather than leaking existence (spec.md §4.4).
    pub async fn cancel(&self, subject: &Subject, job_id: &JobId) -> Result<bool, BrokerError> {
        let Some(job) = self.job_store.get(job_id).await else {
            return Ok(false);
        };
        if job.subject.key != subject.key {
            return Ok(false);
        }
        if job.state.is_terminal() {
            return Ok(false);
        }

        if matches!(job.state, JobState::Queued) && self.queues.remove(job_id) {
            let mut job = job;
            job.state = JobState::Cancelled;
            job.error = Some(crate::domain::JobError {
                kind: crate::error::JobErrorKind::Cancelled,
                message: "cancelled by subject".to_string(),
            });
            self.job_store.update(job.clone()).await.map_err(BrokerError::Store)?;
            self.status_bus.publish(&job.id, EventKind::Cancelled, None).await;
            return Ok(true);
        }

        Ok(self.executor.cancel_in_flight(job_id).await)
    }

    /// Subject mismatch returns "not found" — no information leak about
    /// other subjects' job existence (spec.md §4.4).
    pub async fn query(&self, subject: &Subject, job_id: &JobId) -> Result<Job, BrokerError> {
        let job = self.job_store.get(job_id).await.ok_or(BrokerError::NotFound)?;
        if job.subject.key != subject.key {
            return Err(BrokerError::NotFound);
        }
        Ok(job)
    }

    pub async fn subscribe(&self, job_id: &JobId) -> crate::status_bus::EventReceiver {
        self.status_bus.subscribe(job_id).await
    }

    /// Startup-only: reloads every non-terminal job from C3 and reinserts it
    /// into C6/C7 (spec.md §4.4 restore). Dispatched/InProgress jobs are
    /// reset to Queued with `attempts` unchanged — "the previous attempt is
    /// considered to have failed with a retryable error" — and retry-
    /// scheduled jobs become immediately visible ("retry immediately once on
    /// restart, then follow normal backoff").
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let jobs = self.job_store.list_non_terminal().await;
        let mut restored = 0;

        for mut job in jobs {
            let was_in_flight = matches!(job.state, JobState::Dispatched | JobState::InProgress);
            job.state = JobState::Queued;
            self.job_store.update(job.clone()).await?;

            if was_in_flight {
                self.queues.retry.push(job, std::time::Instant::now());
            } else {
                // Already-queued jobs go back to C6 respecting their
                // original admitted_at/priority.
                let _ = self.queues.fresh.push(job);
            }
            restored += 1;
        }

        info!(restored, "restored non-terminal jobs on startup");
        Ok(restored)
    }
}
