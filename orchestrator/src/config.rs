//! Run configuration: built-in defaults, an optional TOML file, then
//! command-line overrides. Credentials only ever come from the environment.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::backoff::RetryToml;
use crate::client::daily::DEFAULT_DAILY_API_URL;
use crate::client::pipecat::DEFAULT_PIPECAT_API_URL;
use crate::dispatcher::DispatchConfig;
use crate::error::ConfigError;

pub const DEFAULT_NUM_AGENTS: usize = 1000;
pub const DEFAULT_ROOM_PREFIX: &str = "concurrent-test";
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(180);
pub const DEFAULT_LOG_FILE: &str = "agents.log";
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(5);

pub const DAILY_API_KEY_ENV: &str = "DAILY_API_KEY";
pub const PIPECAT_API_KEY_ENV: &str = "PIPECAT_CLOUD_API_KEY";
pub const PIPECAT_PRIVATE_API_KEY_ENV: &str = "PIPECAT_CLOUD_PRIVATE_API_KEY";

/// API keys for the room and agent control-plane services.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub daily_api_key: String,
    pub pipecat_api_key: String,
    /// Enables the post-run session check.
    pub pipecat_private_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("daily_api_key", &"<redacted>")
            .field("pipecat_api_key", &"<redacted>")
            .field(
                "pipecat_private_api_key",
                &self.pipecat_private_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv(key))
        };
        Ok(Self {
            daily_api_key: required(DAILY_API_KEY_ENV)?,
            pipecat_api_key: required(PIPECAT_API_KEY_ENV)?,
            pipecat_private_api_key: lookup(PIPECAT_PRIVATE_API_KEY_ENV)
                .filter(|value| !value.is_empty()),
        })
    }
}

/// Shape of the optional config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub agent_name: Option<String>,
    pub num_agents: Option<usize>,
    pub room_prefix: Option<String>,
    pub concurrency: Option<usize>,
    pub room_ttl_secs: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub daily_api_url: Option<String>,
    pub pipecat_api_url: Option<String>,
    pub verify_delay_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetryToml,
}

impl ConfigToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values supplied on the command line; each one wins over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub agent_name: Option<String>,
    pub num_agents: Option<usize>,
    pub room_prefix: Option<String>,
    pub concurrency: Option<usize>,
    pub room_ttl: Option<Duration>,
    pub attempt_timeout: Option<Duration>,
    pub log_file: Option<PathBuf>,
    pub daily_api_url: Option<String>,
    pub pipecat_api_url: Option<String>,
    pub verify_delay: Option<Duration>,
    pub skip_verify: bool,
    pub retry: RetryToml,
}

/// Everything a run needs apart from credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dispatch: DispatchConfig,
    pub num_agents: usize,
    pub room_prefix: String,
    pub room_ttl: Duration,
    pub log_file: PathBuf,
    pub daily_api_url: String,
    pub pipecat_api_url: String,
    pub verify: bool,
    pub verify_delay: Duration,
}

impl RunConfig {
    /// Reads `config_file` when given and layers `overrides` on top.
    pub fn load(
        config_file: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => ConfigToml::load(path)?,
            None => ConfigToml::default(),
        };
        Self::from_sources(file, overrides)
    }

    pub fn from_sources(file: ConfigToml, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let agent_name = overrides
            .agent_name
            .or(file.agent_name)
            .ok_or_else(|| ConfigError::Invalid("agent name is required".into()))?;

        let mut backoff = BackoffPolicy::default();
        file.retry.apply(&mut backoff);
        overrides.retry.apply(&mut backoff);

        let mut dispatch = DispatchConfig::new(agent_name);
        dispatch.backoff = backoff;
        if let Some(concurrency) = overrides.concurrency.or(file.concurrency) {
            dispatch.concurrency = concurrency;
        }
        if let Some(timeout) = overrides
            .attempt_timeout
            .or(file.attempt_timeout_secs.map(Duration::from_secs))
        {
            dispatch.attempt_timeout = timeout;
        }

        let config = Self {
            dispatch,
            num_agents: overrides
                .num_agents
                .or(file.num_agents)
                .unwrap_or(DEFAULT_NUM_AGENTS),
            room_prefix: overrides
                .room_prefix
                .or(file.room_prefix)
                .unwrap_or_else(|| DEFAULT_ROOM_PREFIX.to_string()),
            room_ttl: overrides
                .room_ttl
                .or(file.room_ttl_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_ROOM_TTL),
            log_file: overrides
                .log_file
                .or(file.log_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            daily_api_url: overrides
                .daily_api_url
                .or(file.daily_api_url)
                .unwrap_or_else(|| DEFAULT_DAILY_API_URL.to_string()),
            pipecat_api_url: overrides
                .pipecat_api_url
                .or(file.pipecat_api_url)
                .unwrap_or_else(|| DEFAULT_PIPECAT_API_URL.to_string()),
            verify: !overrides.skip_verify,
            verify_delay: overrides
                .verify_delay
                .or(file.verify_delay_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_VERIFY_DELAY),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.room_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("room prefix must not be empty".into()));
        }
        if self.room_ttl.is_zero() {
            return Err(ConfigError::Invalid("room ttl must be positive".into()));
        }
        self.dispatch.validate()
    }
}
