//! Process configuration (spec.md §9 ambient stack).
//!
//! Env-var reads follow the teacher's `main.rs` pattern (`env::var(...)
//! .unwrap_or_else(...)`); the per-tier cap table is the one piece rich
//! enough to warrant its own file, loaded via `toml` (spec.md §4.1 Open
//! Question: "is the cap table global or per-deployment-config-file?" —
//! resolved in DESIGN.md as per-deployment-config-file with built-in
//! defaults).

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::Tier;
use crate::quota::TierConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_timeout_secs: u64,
    pub renderer_binary: String,
    pub renderer_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub backoff_cap_secs: u64,
    pub max_queue_size: usize,
    pub global_requests_per_minute: u32,
    pub global_tokens_per_minute: u64,
    pub queue_ttl_secs: Option<u64>,
    pub tiers: HashMap<Tier, TierConfig>,
}

impl AppConfig {
    /// Reads the process environment the way the teacher's `main.rs` does:
    /// every field optional with a documented default, nothing panics on a
    /// missing variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let llm_endpoint = env::var("LLM_ENDPOINT")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_api_key = env::var("LLM_API_KEY").unwrap_or_default();
        let llm_timeout_secs = parse_env_or("LLM_TIMEOUT_SECS", 120);

        let renderer_binary =
            env::var("RENDERER_BINARY").unwrap_or_else(|_| "diagram-renderer".to_string());
        let renderer_timeout_secs = parse_env_or("RENDERER_TIMEOUT_SECS", 120);

        let max_attempts = parse_env_or("MAX_ATTEMPTS", 3);
        let base_delay_secs = parse_env_or("RETRY_BASE_DELAY_SECS", 5);
        let backoff_cap_secs = parse_env_or("RETRY_BACKOFF_CAP_SECS", 60);

        let max_queue_size = parse_env_or("MAX_QUEUE_SIZE", 1000);
        let global_requests_per_minute = parse_env_or("GLOBAL_REQUESTS_PER_MINUTE", 120);
        let global_tokens_per_minute = parse_env_or("GLOBAL_TOKENS_PER_MINUTE", 500_000);

        let queue_ttl_secs = env::var("QUEUE_TTL_SECS").ok().and_then(|v| v.parse().ok());

        let tiers = match env::var("TIER_CONFIG_PATH") {
            Ok(path) => load_tier_config(Path::new(&path))?,
            Err(_) => default_tiers(),
        };

        Ok(Self {
            listen_addr,
            llm_endpoint,
            llm_model,
            llm_api_key,
            llm_timeout_secs,
            renderer_binary,
            renderer_timeout_secs,
            max_attempts,
            base_delay_secs,
            backoff_cap_secs,
            max_queue_size,
            global_requests_per_minute,
            global_tokens_per_minute,
            queue_ttl_secs,
            tiers,
        })
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn renderer_timeout(&self) -> Duration {
        Duration::from_secs(self.renderer_timeout_secs)
    }

    pub fn queue_ttl(&self) -> Option<Duration> {
        self.queue_ttl_secs.map(Duration::from_secs)
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn default_tiers() -> HashMap<Tier, TierConfig> {
    Tier::ALL.iter().map(|&t| (t, TierConfig::default_for(t))).collect()
}

/// Deployment-supplied cap table, one entry per tier (spec.md §4.1 "Cap
/// table"). Falls back to the built-in defaults for any tier the file
/// omits.
fn load_tier_config(path: &Path) -> anyhow::Result<HashMap<Tier, TierConfig>> {
    let contents = std::fs::read_to_string(path)?;
    let parsed: TierConfigFile = toml::from_str(&contents)?;

    let mut tiers = default_tiers();
    if let Some(c) = parsed.t0 {
        tiers.insert(Tier::T0, c);
    }
    if let Some(c) = parsed.t1 {
        tiers.insert(Tier::T1, c);
    }
    if let Some(c) = parsed.t2 {
        tiers.insert(Tier::T2, c);
    }
    if let Some(c) = parsed.t3 {
        tiers.insert(Tier::T3, c);
    }
    Ok(tiers)
}

#[derive(Debug, Deserialize)]
struct TierConfigFile {
    t0: Option<TierConfig>,
    t1: Option<TierConfig>,
    t2: Option<TierConfig>,
    t3: Option<TierConfig>,
}
