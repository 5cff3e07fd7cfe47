//! Exponential backoff with jitter for rate-limited start-agent calls.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER_FRACTION: f64 = 0.2;
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 2;

/// Retry parameters shared by every dispatcher worker.
///
/// Delays are a pure function of the attempt number; the policy carries no
/// per-job state, so one value can be cloned into every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    /// Total start-agent attempts allowed per job, across all retry causes.
    pub max_attempts: u32,
    /// Immediate retries allowed after transient network failures.
    pub transient_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::Invalid(format!(
                "jitter fraction {} must be in [0, 1)",
                self.jitter_fraction
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// `min(max_delay, base_delay * 2^attempt)`, before jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay before retry number `attempt` (zero-based), with jitter drawn
    /// uniformly from `[0, delay * jitter_fraction)`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let spread = delay.mul_f64(self.jitter_fraction);
        if spread.is_zero() {
            return delay;
        }
        let jitter = rand::rng().random_range(Duration::ZERO..spread);
        delay + jitter
    }

    /// Like [`Self::next_delay`], but never shorter than a server-provided
    /// `Retry-After` hint.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.next_delay(attempt);
        match retry_after {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }
}

/// Optional overrides as they appear in the `[retry]` table of the config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryToml {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_fraction: Option<f64>,
    pub transient_retries: Option<u32>,
}

impl RetryToml {
    pub fn apply(&self, policy: &mut BackoffPolicy) {
        if let Some(max_attempts) = self.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = self.jitter_fraction {
            policy.jitter_fraction = jitter;
        }
        if let Some(retries) = self.transient_retries {
            policy.transient_retries = retries;
        }
    }
}
