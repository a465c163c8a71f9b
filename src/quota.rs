//! Rate/Quota evaluator (C4, spec.md §4.1).
//!
//! Decides, in O(1) amortized per call, whether a submission may be
//! admitted. Generalizes the teacher's hand-rolled `TokenBucket` /
//! `SlidingWindow` pair (`api/websocket/rate_limiter.rs`) into fixed-window
//! per-subject counters plus a pair of dispatcher-owned global counters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Subject, Tier};
use crate::store::jobs::JobStore;
use crate::store::usage::UsageStore;

/// Cap table entry, one per tier (spec.md §4.1 "Cap table").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    pub requests_per_day: u32,
    pub requests_per_hour: u32,
    pub tokens_per_day: u64,
    pub max_concurrent: u32,
    pub priority: u8,
}

impl TierConfig {
    pub fn default_for(tier: Tier) -> Self {
        match tier {
            Tier::T0 => TierConfig {
                requests_per_day: 50,
                requests_per_hour: 10,
                tokens_per_day: 200_000,
                max_concurrent: 1,
                priority: 0,
            },
            Tier::T1 => TierConfig {
                requests_per_day: 200,
                requests_per_hour: 40,
                tokens_per_day: 1_000_000,
                max_concurrent: 2,
                priority: 1,
            },
            Tier::T2 => TierConfig {
                requests_per_day: 500,
                requests_per_hour: 100,
                tokens_per_day: 5_000_000,
                max_concurrent: 5,
                priority: 2,
            },
            Tier::T3 => TierConfig {
                requests_per_day: 2000,
                requests_per_hour: 400,
                tokens_per_day: 20_000_000,
                max_concurrent: 10,
                priority: 3,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionReason {
    SubjectDailyExhausted,
    SubjectHourlyExhausted,
    SubjectConcurrencyExceeded,
    GlobalRequestsExhausted,
    GlobalTokensExhausted,
    QueueFull,
}

impl AdmissionReason {
    pub fn code(self) -> &'static str {
        match self {
            AdmissionReason::SubjectDailyExhausted => "subject-daily-exhausted",
            AdmissionReason::SubjectHourlyExhausted => "subject-hourly-exhausted",
            AdmissionReason::SubjectConcurrencyExceeded => "subject-concurrency-exceeded",
            AdmissionReason::GlobalRequestsExhausted => "global-requests-exhausted",
            AdmissionReason::GlobalTokensExhausted => "global-tokens-exhausted",
            AdmissionReason::QueueFull => "queue-full",
        }
    }
}

#[derive(Debug, Error)]
#[error("admission rejected: {reason:?}")]
pub struct AdmissionError {
    pub reason: AdmissionReason,
    pub retry_after: Option<Duration>,
}

impl AdmissionError {
    pub fn status_code(&self) -> u16 {
        429
    }
}

struct CachedAggregate {
    requests_hour: u32,
    requests_day: u32,
    tokens_day: u64,
    cached_at: Instant,
}

/// Dispatcher-owned global per-minute counters. Only `record_dispatch` (the
/// single writer, spec.md §9 "Single-writer dispatcher") mutates state;
/// `check` is read-only and safe to call concurrently from ingress.
struct GlobalWindow {
    minute_start: Instant,
    requests: u32,
    tokens: u64,
}

impl GlobalWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_start: now,
            requests: 0,
            tokens: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.minute_start) >= Duration::from_secs(60) {
            self.minute_start = now;
            self.requests = 0;
            self.tokens = 0;
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        Duration::from_secs(60).saturating_sub(now.duration_since(self.minute_start))
    }
}

pub struct QuotaEvaluator {
    tier_configs: HashMap<Tier, TierConfig>,
    max_queue_size: usize,
    global_requests_per_minute: u32,
    global_tokens_per_minute: u64,
    usage_store: std::sync::Arc<dyn UsageStore>,
    job_store: std::sync::Arc<dyn JobStore>,
    aggregate_cache: Mutex<HashMap<String, CachedAggregate>>,
    global: Mutex<GlobalWindow>,
    subject_cache_ttl: Duration,
}

impl QuotaEvaluator {
    pub fn new(
        tier_configs: HashMap<Tier, TierConfig>,
        max_queue_size: usize,
        global_requests_per_minute: u32,
        global_tokens_per_minute: u64,
        usage_store: std::sync::Arc<dyn UsageStore>,
        job_store: std::sync::Arc<dyn JobStore>,
    ) -> Self {
        Self {
            tier_configs,
            max_queue_size,
            global_requests_per_minute,
            global_tokens_per_minute,
            usage_store,
            job_store,
            aggregate_cache: Mutex::new(HashMap::new()),
            global: Mutex::new(GlobalWindow::new(Instant::now())),
            subject_cache_ttl: Duration::from_secs(60),
        }
    }

    pub fn with_defaults(
        usage_store: std::sync::Arc<dyn UsageStore>,
        job_store: std::sync::Arc<dyn JobStore>,
    ) -> Self {
        let tier_configs = Tier::ALL
            .iter()
            .map(|&t| (t, TierConfig::default_for(t)))
            .collect();
        Self::new(tier_configs, 1000, 120, 500_000, usage_store, job_store)
    }

    pub fn tier_config(&self, tier: Tier) -> TierConfig {
        self.tier_configs
            .get(&tier)
            .copied()
            .unwrap_or_else(|| TierConfig::default_for(Tier::T0))
    }

    pub fn priority_for(&self, tier: Tier) -> u8 {
        self.tier_config(tier).priority
    }

    /// Evaluation order per spec.md §4.1: queue depth, subject concurrency,
    /// subject hour/day, global per-minute.
    pub async fn evaluate(
        &self,
        subject: &Subject,
        queue_len: usize,
        live_non_terminal_count: u32,
    ) -> Result<(), AdmissionError> {
        if queue_len >= self.max_queue_size {
            return Err(AdmissionError {
                reason: AdmissionReason::QueueFull,
                retry_after: None,
            });
        }

        let cfg = self.tier_config(subject.tier);

        if live_non_terminal_count >= cfg.max_concurrent {
            return Err(AdmissionError {
                reason: AdmissionReason::SubjectConcurrencyExceeded,
                retry_after: None,
            });
        }

        let agg = self.subject_aggregate(subject).await;

        if agg.requests_hour >= cfg.requests_per_hour {
            return Err(AdmissionError {
                reason: AdmissionReason::SubjectHourlyExhausted,
                retry_after: Some(seconds_until_top_of_hour()),
            });
        }
        if agg.requests_day >= cfg.requests_per_day || agg.tokens_day >= cfg.tokens_per_day {
            return Err(AdmissionError {
                reason: AdmissionReason::SubjectDailyExhausted,
                retry_after: Some(seconds_until_midnight()),
            });
        }

        self.check_global(0, 0)
    }

    /// Read-only global-cap check used both at admission and by the
    /// executor immediately before popping the next job (spec.md §4.3 step
    /// 2). `extra_requests`/`extra_tokens` let the executor probe "would
    /// one more call still fit" without committing it.
    pub fn check_global(
        &self,
        extra_requests: u32,
        extra_tokens: u64,
    ) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let mut global = self.global.lock().unwrap();
        global.roll(now);

        if global.requests + extra_requests > self.global_requests_per_minute {
            return Err(AdmissionError {
                reason: AdmissionReason::GlobalRequestsExhausted,
                retry_after: Some(global.retry_after(now)),
            });
        }
        if global.tokens + extra_tokens > self.global_tokens_per_minute {
            return Err(AdmissionError {
                reason: AdmissionReason::GlobalTokensExhausted,
                retry_after: Some(global.retry_after(now)),
            });
        }
        Ok(())
    }

    /// Records an outbound LLM call against the global per-minute budget.
    /// Only the dispatcher calls this (single-writer discipline, spec.md
    /// §5/§9).
    pub fn record_dispatch(&self, tokens: u64) {
        let now = Instant::now();
        let mut global = self.global.lock().unwrap();
        global.roll(now);
        global.requests += 1;
        global.tokens += tokens;
    }

    /// Invalidates the cached aggregate for a subject. Called by the
    /// executor whenever it appends a usage record for that subject
    /// (spec.md §4.1 "Cache is invalidated ... on every append").
    pub fn invalidate(&self, subject: &Subject) {
        self.aggregate_cache.lock().unwrap().remove(&subject.key);
    }

    async fn subject_aggregate(&self, subject: &Subject) -> CachedAggregateView {
        {
            let cache = self.aggregate_cache.lock().unwrap();
            if let Some(entry) = cache.get(&subject.key) {
                if entry.cached_at.elapsed() < self.subject_cache_ttl {
                    return CachedAggregateView {
                        requests_hour: entry.requests_hour,
                        requests_day: entry.requests_day,
                        tokens_day: entry.tokens_day,
                    };
                }
            }
        }

        let now = Local::now();
        let hour_start = top_of_hour(now);
        let day_start = start_of_day(now);
        let hour_start_utc = hour_start.with_timezone(&chrono::Utc);
        let day_start_utc = day_start.with_timezone(&chrono::Utc);

        // Request counts come from the job store, which records every
        // accepted submission the instant it is admitted regardless of
        // whether it has since settled. The usage ledger only gains an
        // entry once a job reaches a terminal state (spec.md §3), so
        // counting from it alone would let a burst of Queued/Dispatched/
        // InProgress jobs slip past the per-window request caps (I5).
        let requests_hour = self.job_store.count_admitted_since(&subject.key, hour_start_utc).await;
        let requests_day = self.job_store.count_admitted_since(&subject.key, day_start_utc).await;

        // Tokens are only known once a call settles, so the daily token
        // budget is still read from the usage ledger.
        let (_, _, tokens_day) = self
            .usage_store
            .window_aggregate(subject, hour_start_utc, day_start_utc)
            .await;

        let mut cache = self.aggregate_cache.lock().unwrap();
        cache.insert(
            subject.key.clone(),
            CachedAggregate {
                requests_hour,
                requests_day,
                tokens_day,
                cached_at: Instant::now(),
            },
        );

        CachedAggregateView {
            requests_hour,
            requests_day,
            tokens_day,
        }
    }
}

struct CachedAggregateView {
    requests_hour: u32,
    requests_day: u32,
    tokens_day: u64,
}

fn top_of_hour(now: DateTime<Local>) -> DateTime<Local> {
    now.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now)
}

fn start_of_day(now: DateTime<Local>) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

fn seconds_until_top_of_hour() -> Duration {
    let now = Local::now();
    let next_hour = top_of_hour(now) + chrono::Duration::hours(1);
    (next_hour - now).to_std().unwrap_or(Duration::ZERO)
}

fn seconds_until_midnight() -> Duration {
    let now = Local::now();
    let next_day = start_of_day(now) + chrono::Duration::days(1);
    (next_day - now).to_std().unwrap_or(Duration::ZERO)
}
