//! Process-level CLI flags (spec.md §9 ambient stack), modeled on the
//! teacher's `clap::Parser`-derived `cli::Cli`. This binary has a single
//! mode (run the broker), so there is no subcommand enum, just overrides
//! for the handful of settings an operator wants on the command line
//! instead of the environment.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "diagram-broker")]
#[command(version)]
#[command(about = "Admission, queuing and execution broker for diagram-generation jobs", long_about = None)]
pub struct Args {
    /// Overrides LISTEN_ADDR.
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Path to a TOML file overriding the per-tier cap table. Overrides
    /// TIER_CONFIG_PATH.
    #[arg(long, env = "TIER_CONFIG_PATH")]
    pub tier_config: Option<String>,

    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or
    /// "diagram_broker=debug,tower_http=info".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}
