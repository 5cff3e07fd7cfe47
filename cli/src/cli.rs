use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fleet_orchestrator::backoff::RetryToml;
use fleet_orchestrator::config::ConfigOverrides;

/// Provision a batch of rooms and start one agent in each, absorbing control
/// plane throttling with backoff.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "fleet", version)]
pub struct Cli {
    /// Name of the deployed agent to start in every room.
    #[arg(long = "agent-name", value_name = "NAME", required_unless_present = "config")]
    pub agent_name: Option<String>,

    /// Number of rooms and agents to create (default 1000).
    #[arg(long = "num-agents", value_name = "N")]
    pub num_agents: Option<usize>,

    /// Room names are `<prefix>-<index>` (default "concurrent-test").
    #[arg(long = "room-prefix", value_name = "PREFIX")]
    pub room_prefix: Option<String>,

    /// Maximum start-agent requests in flight at once (default 30).
    #[arg(long, short = 'c', value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: Option<u64>,

    /// TOML file with run settings; flags given here win over it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Attempts per agent, counting the first one.
    #[arg(long = "max-attempts", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    #[arg(long = "base-delay-ms", value_name = "MS")]
    pub base_delay_ms: Option<u64>,

    #[arg(long = "max-delay-ms", value_name = "MS")]
    pub max_delay_ms: Option<u64>,

    /// Random extra delay as a fraction of the backoff delay, in [0, 1).
    #[arg(long = "jitter", value_name = "FRACTION")]
    pub jitter: Option<f64>,

    /// Immediate retries allowed after network errors and timeouts.
    #[arg(long = "transient-retries", value_name = "N")]
    pub transient_retries: Option<u32>,

    #[arg(long = "attempt-timeout-secs", value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub attempt_timeout_secs: Option<u64>,

    #[arg(long = "room-ttl-secs", value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub room_ttl_secs: Option<u64>,

    /// Append-only transition log (default agents.log).
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Also write a debug-level trace to this file.
    #[arg(long = "trace-log", value_name = "FILE")]
    pub trace_log: Option<PathBuf>,

    #[arg(long = "daily-api-url", value_name = "URL")]
    pub daily_api_url: Option<String>,

    #[arg(long = "pipecat-api-url", value_name = "URL")]
    pub pipecat_api_url: Option<String>,

    /// Do not check active sessions after the run.
    #[arg(long = "skip-verify", default_value_t = false)]
    pub skip_verify: bool,

    /// Wait before checking active sessions (default 5).
    #[arg(long = "verify-delay-secs", value_name = "SECS")]
    pub verify_delay_secs: Option<u64>,
}

impl Cli {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            agent_name: self.agent_name.clone(),
            num_agents: self.num_agents,
            room_prefix: self.room_prefix.clone(),
            concurrency: self
                .concurrency
                .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX)),
            room_ttl: self.room_ttl_secs.map(Duration::from_secs),
            attempt_timeout: self.attempt_timeout_secs.map(Duration::from_secs),
            log_file: self.log_file.clone(),
            daily_api_url: self.daily_api_url.clone(),
            pipecat_api_url: self.pipecat_api_url.clone(),
            verify_delay: self.verify_delay_secs.map(Duration::from_secs),
            skip_verify: self.skip_verify,
            retry: RetryToml {
                max_attempts: self.max_attempts,
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
                jitter_fraction: self.jitter,
                transient_retries: self.transient_retries,
            },
        }
    }
}
