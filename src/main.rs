use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use diagram_broker::api::{self, ApiConfig, AppState};
use diagram_broker::cli::Args;
use diagram_broker::config::AppConfig;
use diagram_broker::executor::{Executor, ExecutorConfig};
use diagram_broker::llm::HttpLlmClient;
use diagram_broker::monitoring::Metrics;
use diagram_broker::queue::Queues;
use diagram_broker::quota::QuotaEvaluator;
use diagram_broker::render::{ChildProcessRenderer, RendererConfig};
use diagram_broker::status_bus::StatusBus;
use diagram_broker::store::{InMemoryJobStore, InMemoryUsageStore};
use diagram_broker::{clock::Clock, Broker};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = %diagram_broker::version::VERSION, "starting diagram-broker");

    if let Some(path) = &args.tier_config {
        std::env::set_var("TIER_CONFIG_PATH", path);
    }
    let mut config = AppConfig::from_env().context("failed to load configuration")?;
    if let Some(addr) = &args.listen_addr {
        config.listen_addr = addr.parse().context("invalid --listen-addr")?;
    }

    let clock = Arc::new(Clock::new());
    let job_store = Arc::new(InMemoryJobStore::new());
    let usage_store = Arc::new(InMemoryUsageStore::new());
    let status_bus = StatusBus::new();
    let queues = Arc::new(Queues::new(config.max_queue_size));
    let metrics = Arc::new(Metrics::new().context("failed to initialize metrics")?);

    let quota = Arc::new(QuotaEvaluator::new(
        config.tiers.clone(),
        config.max_queue_size,
        config.global_requests_per_minute,
        config.global_tokens_per_minute,
        usage_store.clone(),
        job_store.clone(),
    ));

    let llm = Arc::new(
        HttpLlmClient::new(
            config.llm_endpoint.clone(),
            config.llm_model.clone(),
            config.llm_api_key.clone(),
            config.llm_timeout(),
        )
        .context("failed to build LLM client")?,
    );

    let renderer = Arc::new(ChildProcessRenderer::new(RendererConfig {
        binary: config.renderer_binary.clone(),
        timeout: config.renderer_timeout(),
        upstream_credential_env: if config.llm_api_key.is_empty() {
            None
        } else {
            Some(("LLM_API_KEY".to_string(), config.llm_api_key.clone()))
        },
        ..RendererConfig::default()
    }));

    let executor_config = ExecutorConfig {
        max_attempts: config.max_attempts,
        base_delay: std::time::Duration::from_secs(config.base_delay_secs),
        backoff_cap: std::time::Duration::from_secs(config.backoff_cap_secs),
        llm_timeout: config.llm_timeout(),
        queue_ttl: config.queue_ttl(),
    };

    let executor = Executor::new(
        job_store.clone(),
        usage_store.clone(),
        quota.clone(),
        status_bus.clone(),
        queues.clone(),
        llm,
        renderer,
        metrics.clone(),
        executor_config,
    );

    let broker = Arc::new(Broker::new(
        job_store,
        quota,
        status_bus,
        queues,
        executor.clone(),
        clock,
        metrics.clone(),
    ));

    let restored = broker.restore().await.context("failed to restore queue state")?;
    info!(restored, "startup restore complete");

    tokio::spawn(executor.run());

    let auth = Arc::new(load_auth_table());

    let state = AppState {
        broker,
        metrics,
        auth,
    };

    let api_config = ApiConfig {
        listen_addr: config.listen_addr,
        ..ApiConfig::default()
    };

    api::serve(api_config, state).await
}

/// Populates the bearer-credential table from `API_KEYS` (comma-separated
/// `credential:subjectKey:tier` triples), the flat-list pattern generalized
/// from the teacher's `api_keys: Vec<String>` into one that also carries
/// tier.
fn load_auth_table() -> api::AuthTable {
    use diagram_broker::domain::Tier;

    let mut table = api::AuthTable::new();
    if let Ok(raw) = std::env::var("API_KEYS") {
        for entry in raw.split(',').filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(credential), Some(subject_key), Some(tier)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let tier = match tier {
                "T0" => Tier::T0,
                "T1" => Tier::T1,
                "T2" => Tier::T2,
                "T3" => Tier::T3,
                _ => continue,
            };
            table.insert(credential, subject_key, tier);
        }
    }
    table
}
