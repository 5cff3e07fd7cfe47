use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::job::JobId;

/// Failure of the single batched room-create call. Always fatal for the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("room batch request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("room batch request returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("room batch response could not be decoded: {0}")]
    Decode(String),
    #[error("requested {requested} rooms but the batch returned {returned}")]
    CountMismatch { requested: usize, returned: usize },
    #[error("batch returned duplicate room name `{0}`")]
    DuplicateName(String),
    #[error("batch returned room `{returned}` at position {index}, expected `{expected}`")]
    UnexpectedName {
        index: usize,
        expected: String,
        returned: String,
    },
}

/// How a failed start-agent attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry through the exponential backoff schedule.
    RateLimit,
    /// Retry immediately from the small transient budget.
    Transient,
    /// Never retried.
    Permanent,
}

/// Failure of one start-agent attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StartAgentError {
    #[error("rate limited by control plane")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("start rejected with status {status}: {body}")]
    Permanent { status: u16, body: String },
}

impl StartAgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StartAgentError::RateLimited { .. } => ErrorClass::RateLimit,
            StartAgentError::Transient(_) => ErrorClass::Transient,
            StartAgentError::Permanent { .. } => ErrorClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for StartAgentError {
    fn from(err: reqwest::Error) -> Self {
        StartAgentError::Transient(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to open transition log {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to transition log")]
    Write(#[from] std::io::Error),
    #[error("{0} already reported a terminal state")]
    DuplicateTerminal(JobId),
}

/// Failure of the optional post-run session check. Reported, never fatal.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("session listing request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("session listing returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("session listing could not be decoded: {0}")]
    Decode(String),
}

/// Errors that abort a dispatcher run as a whole.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("dispatcher worker panicked: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_variant() {
        assert_eq!(
            StartAgentError::RateLimited { retry_after: None }.class(),
            ErrorClass::RateLimit
        );
        assert_eq!(
            StartAgentError::Transient("connection reset".to_string()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            StartAgentError::Permanent {
                status: 404,
                body: "agent not found".to_string()
            }
            .class(),
            ErrorClass::Permanent
        );
    }
}
