//! Executor (C8): the single logical serial worker (spec.md §4.3).
//!
//! Generalizes `job_processor.rs`'s dispatch loop (there: poll contract
//! events, claim, run inference, submit result) into: wait for a ready job,
//! evaluate global caps, dispatch, call the LLM, call the renderer, settle.
//! Serializing on one in-flight outbound call at a time is the primary
//! enforcement point for the global rate limits (spec.md §4.3 intro).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{Job, JobError, JobId, JobResult, JobState, UsageRecord};
use crate::error::JobErrorKind;
use crate::llm::{LlmClient, LlmError, LlmRequest};
use crate::monitoring::Metrics;
use crate::quota::QuotaEvaluator;
use crate::queue::Queues;
use crate::render::{RenderError, RenderRequest, Renderer};
use crate::status_bus::{EventKind, StatusBus};
use crate::store::{JobStore, UsageStore};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_cap: Duration,
    pub llm_timeout: Duration,
    pub queue_ttl: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            llm_timeout: Duration::from_secs(120),
            queue_ttl: None,
        }
    }
}

pub struct Executor {
    job_store: Arc<dyn JobStore>,
    usage_store: Arc<dyn UsageStore>,
    quota: Arc<QuotaEvaluator>,
    status_bus: Arc<StatusBus>,
    queues: Arc<Queues>,
    llm: Arc<dyn LlmClient>,
    renderer: Arc<dyn Renderer>,
    metrics: Arc<Metrics>,
    config: ExecutorConfig,
    cancel_tokens: RwLock<HashMap<JobId, CancellationToken>>,
}

impl Executor {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        usage_store: Arc<dyn UsageStore>,
        quota: Arc<QuotaEvaluator>,
        status_bus: Arc<StatusBus>,
        queues: Arc<Queues>,
        llm: Arc<dyn LlmClient>,
        renderer: Arc<dyn Renderer>,
        metrics: Arc<Metrics>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_store,
            usage_store,
            quota,
            status_bus,
            queues,
            llm,
            renderer,
            metrics,
            config,
            cancel_tokens: RwLock::new(HashMap::new()),
        })
    }

    /// Runs the dispatch loop forever. Intended to be spawned as the single
    /// dispatcher task (spec.md §5 "exactly one logical task").
    pub async fn run(self: Arc<Self>) {
        loop {
            self.queues.wait_until_ready().await;

            if let Err(e) = self.quota.check_global(1, 0) {
                let wait = e.retry_after.unwrap_or(Duration::from_secs(1));
                warn!(reason = ?e.reason, wait_secs = wait.as_secs(), "global cap blocks dispatch");
                tokio::time::sleep(wait).await;
                continue;
            }

            let Some(job) = self.queues.pop_ready() else {
                continue;
            };

            self.metrics.queue_depth.set(self.queues.fresh.len() as i64);
            self.metrics.in_flight_jobs.inc();
            self.process(job).await;
        }
    }

    /// Registers a cancellation token for a job so `cancel` can reach a
    /// Dispatched/InProgress job (spec.md §4.3 "Cancellation").
    async fn register(&self, id: &JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel_tokens.write().await.insert(id.clone(), token.clone());
        token
    }

    async fn unregister(&self, id: &JobId) {
        self.cancel_tokens.write().await.remove(id);
    }

    /// Requests cancellation of an in-flight job. Returns `true` exactly
    /// once per job (spec.md P8 cancel idempotence): the token is removed
    /// from the registry atomically with the check, so a second concurrent
    /// caller sees nothing to cancel.
    pub async fn cancel_in_flight(&self, id: &JobId) -> bool {
        let token = self.cancel_tokens.write().await.remove(id);
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn process(&self, mut job: Job) {
        if let Some(ttl) = self.config.queue_ttl {
            let age = chrono::Utc::now().signed_duration_since(job.admitted_at);
            if job.attempts == 0 && age.to_std().map(|a| a > ttl).unwrap_or(false) {
                self.fail(job, JobErrorKind::StalenessExpired, "queue TTL exceeded".into())
                    .await;
                return;
            }
        }

        let token = self.register(&job.id).await;

        job.state = JobState::Dispatched;
        job.attempts += 1;
        self.persist(&job).await;
        self.publish(&job, EventKind::Dispatched, None).await;

        if token.is_cancelled() {
            self.cancel(job).await;
            return;
        }

        job.state = JobState::InProgress;
        self.persist(&job).await;
        self.publish(&job, EventKind::InProgress, None).await;

        let llm_prompt = job
            .spec
            .prompt
            .clone()
            .unwrap_or_else(|| format!("template:{}", job.spec.template_id.clone().unwrap_or_default()));

        let llm_result = tokio::select! {
            _ = token.cancelled() => None,
            r = tokio::time::timeout(
                self.config.llm_timeout,
                self.llm.generate(LlmRequest { prompt: llm_prompt, style: job.spec.style }),
            ) => Some(r),
        };

        let Some(llm_result) = llm_result else {
            self.unregister(&job.id).await;
            self.cancel(job).await;
            return;
        };

        let llm_response = match llm_result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.unregister(&job.id).await;
                self.settle_llm_error(job, e).await;
                return;
            }
            Err(_) => {
                self.unregister(&job.id).await;
                self.settle_timeout(job).await;
                return;
            }
        };

        self.quota.record_dispatch(llm_response.tokens_in + llm_response.tokens_out);

        let source = extract_payload(&llm_response.text);

        let render_request = RenderRequest {
            request_id: job.id.clone(),
            source,
            style: job.spec.style,
            quality: job.spec.quality,
            diagram_type: job.spec.diagram_type,
            output_format: job.spec.output_format.clone(),
        };

        let render_result = tokio::select! {
            _ = token.cancelled() => None,
            r = self.renderer.render(render_request) => Some(r),
        };

        self.unregister(&job.id).await;

        let Some(render_result) = render_result else {
            self.cancel(job).await;
            return;
        };

        match render_result {
            Ok(output) => {
                self.complete(
                    job,
                    JobResult {
                        raster: output.raster,
                        source: output.vector_source,
                        exchange_document: output.exchange_document,
                        tokens_consumed: llm_response.tokens_in + llm_response.tokens_out,
                    },
                    llm_response.tokens_in,
                    llm_response.tokens_out,
                )
                .await;
            }
            Err(e) => {
                self.settle_render_error(job, e, llm_response.tokens_in, llm_response.tokens_out)
                    .await;
            }
        }
    }

    async fn settle_llm_error(&self, job: Job, e: LlmError) {
        let kind = if e.is_retryable() {
            JobErrorKind::UpstreamTransient
        } else {
            JobErrorKind::UpstreamPermanent
        };
        self.retry_or_fail(job, kind, e.to_string(), 0, 0).await;
    }

    /// An LLM-phase timeout is retryable (spec.md §7 "Timeout ... treated as
    /// UpstreamTransient for the LLM case"), unlike a render-phase timeout,
    /// which `settle_render_error` always treats as terminal.
    async fn settle_timeout(&self, job: Job) {
        self.retry_or_fail(job, JobErrorKind::UpstreamTransient, "llm call timed out".to_string(), 0, 0)
            .await;
    }

    /// RenderFailure is terminal: the LLM output for a given attempt is
    /// deterministic, so re-rendering the same source would fail again
    /// (spec.md §7 RenderFailure). A render-side `Timeout` is likewise
    /// terminal per spec.md §7.
    async fn settle_render_error(&self, job: Job, e: RenderError, tokens_in: u64, tokens_out: u64) {
        self.fail_with_usage(job, JobErrorKind::RenderFailure, e.to_string(), tokens_in, tokens_out)
            .await;
    }

    async fn retry_or_fail(
        &self,
        mut job: Job,
        kind: JobErrorKind,
        message: String,
        tokens_in: u64,
        tokens_out: u64,
    ) {
        if kind.is_retryable() && job.attempts < self.config.max_attempts {
            let backoff = self.backoff_for(job.attempts);
            job.state = JobState::Queued;
            self.persist(&job).await;
            self.publish(
                &job,
                EventKind::Retry,
                Some(json!({ "attempt": job.attempts, "backoffSecs": backoff.as_secs() })),
            )
            .await;
            self.queues.retry.push(job, Instant::now() + backoff);
        } else {
            self.fail_with_usage(job, kind, message, tokens_in, tokens_out).await;
        }
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(10);
        let delay = self.config.base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        delay.min(self.config.backoff_cap)
    }

    async fn fail(&self, job: Job, kind: JobErrorKind, message: String) {
        self.fail_with_usage(job, kind, message, 0, 0).await;
    }

    async fn fail_with_usage(
        &self,
        mut job: Job,
        kind: JobErrorKind,
        message: String,
        tokens_in: u64,
        tokens_out: u64,
    ) {
        job.state = JobState::Failed;
        job.error = Some(JobError { kind, message: message.clone() });
        self.persist(&job).await;

        let record = UsageRecord {
            subject: job.subject.clone(),
            timestamp: chrono::Utc::now(),
            tokens_in,
            tokens_out,
            success: false,
            error_kind: Some(kind),
            estimated_cost: estimate_cost(tokens_in, tokens_out),
        };
        if let Err(e) = self.usage_store.append(record).await {
            error!(job_id = %job.id, error = %e, "failed to append usage record");
        }
        self.quota.invalidate(&job.subject);

        error!(job_id = %job.id, kind = %kind, "job failed");
        self.metrics.in_flight_jobs.dec();
        self.metrics.record_terminal("failed", latency_secs(&job));
        self.publish(&job, EventKind::Failed, Some(json!({ "errorKind": kind, "message": message })))
            .await;
    }

    async fn complete(&self, mut job: Job, result: JobResult, tokens_in: u64, tokens_out: u64) {
        job.state = JobState::Completed;
        job.result = Some(result.clone());
        self.persist(&job).await;

        let record = UsageRecord {
            subject: job.subject.clone(),
            timestamp: chrono::Utc::now(),
            tokens_in,
            tokens_out,
            success: true,
            error_kind: None,
            estimated_cost: estimate_cost(tokens_in, tokens_out),
        };
        if let Err(e) = self.usage_store.append(record).await {
            error!(job_id = %job.id, error = %e, "failed to append usage record");
        }
        self.quota.invalidate(&job.subject);

        info!(job_id = %job.id, tokens = result.tokens_consumed, "job completed");
        self.metrics.in_flight_jobs.dec();
        self.metrics.record_terminal("completed", latency_secs(&job));
        self.publish(&job, EventKind::Completed, None).await;
    }

    /// Cancellation never writes a usage record with `success=true`
    /// (spec.md S6); the core chooses not to record one at all.
    async fn cancel(&self, mut job: Job) {
        job.state = JobState::Cancelled;
        job.error = Some(JobError {
            kind: JobErrorKind::Cancelled,
            message: "cancelled by subject".to_string(),
        });
        self.persist(&job).await;
        info!(job_id = %job.id, "job cancelled");
        self.metrics.in_flight_jobs.dec();
        self.metrics.record_terminal("cancelled", latency_secs(&job));
        self.publish(&job, EventKind::Cancelled, None).await;
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.job_store.update(job.clone()).await {
            error!(job_id = %job.id, error = %e, "failed to persist job state");
        }
    }

    async fn publish(&self, job: &Job, kind: EventKind, data: Option<serde_json::Value>) {
        self.status_bus.publish(&job.id, kind, data).await;
    }
}

/// Strips a single enclosing code fence if present, preserving the inner
/// text verbatim (spec.md §4.3.1). Purely lexical.
pub fn extract_payload(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return response.to_string();
    }

    let after_open = &trimmed[3..];
    let first_newline = match after_open.find('\n') {
        Some(i) => i,
        None => return response.to_string(),
    };
    let body_start = first_newline + 1;
    let body = &after_open[body_start..];

    match body.rfind("```") {
        Some(close_idx) => body[..close_idx].to_string(),
        None => body.to_string(),
    }
}

/// Wall-clock seconds from admission to now, for the terminal-latency
/// histogram (spec.md §9 ambient metrics).
fn latency_secs(job: &Job) -> f64 {
    chrono::Utc::now()
        .signed_duration_since(job.admitted_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Fixed price table. Placeholder rates per million tokens, in/out.
fn estimate_cost(tokens_in: u64, tokens_out: u64) -> f64 {
    const PRICE_PER_MILLION_IN: f64 = 3.0;
    const PRICE_PER_MILLION_OUT: f64 = 15.0;
    (tokens_in as f64 / 1_000_000.0) * PRICE_PER_MILLION_IN
        + (tokens_out as f64 / 1_000_000.0) * PRICE_PER_MILLION_OUT
}
