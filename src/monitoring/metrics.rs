//! Prometheus-backed metrics (spec.md §9 ambient stack).
//!
//! The teacher hand-rolls its own `MetricsCollector`/`Counter`/`Gauge`
//! types instead of depending on a metrics crate; this module instead uses
//! `prometheus` directly; see DESIGN.md for why.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub admissions_total: IntCounterVec,
    pub rejections_total: IntCounterVec,
    pub jobs_completed_total: IntCounterVec,
    pub queue_depth: IntGauge,
    pub in_flight_jobs: IntGauge,
    pub job_latency_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let admissions_total = IntCounterVec::new(
            Opts::new("broker_admissions_total", "Accepted submissions by tier"),
            &["tier"],
        )?;
        let rejections_total = IntCounterVec::new(
            Opts::new("broker_rejections_total", "Rejected submissions by reason"),
            &["reason"],
        )?;
        let jobs_completed_total = IntCounterVec::new(
            Opts::new("broker_jobs_completed_total", "Terminal jobs by outcome"),
            &["outcome"],
        )?;
        let queue_depth = IntGauge::new("broker_queue_depth", "Jobs currently queued in C6")?;
        let in_flight_jobs = IntGauge::new(
            "broker_in_flight_jobs",
            "Jobs currently Dispatched or InProgress",
        )?;
        let job_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "broker_job_latency_seconds",
            "Wall-clock time from admission to terminal state",
        ))?;

        registry.register(Box::new(admissions_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(jobs_completed_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(in_flight_jobs.clone()))?;
        registry.register(Box::new(job_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            admissions_total,
            rejections_total,
            jobs_completed_total,
            queue_depth,
            in_flight_jobs,
            job_latency_seconds,
        })
    }

    pub fn record_admission(&self, tier: &str) {
        self.admissions_total.with_label_values(&[tier]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn record_terminal(&self, outcome: &str, latency_secs: f64) {
        self.jobs_completed_total.with_label_values(&[outcome]).inc();
        self.job_latency_seconds.observe(latency_secs);
    }

    pub fn gather_text(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
