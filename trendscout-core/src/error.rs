use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Outcome of a single upstream time-series request that produced no series.
///
/// The fetcher never retries on its own; the orchestrator decides what to do
/// with each variant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Upstream answered, but with nothing usable. Terminal, not retried.
    #[error("No usable data points returned")]
    Empty,

    /// Network trouble or a rate-limit signal. Retried under backoff.
    #[error("Transient upstream failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Malformed or rejected request. The keyword is abandoned.
    #[error("Request rejected: {reason}")]
    Fatal { reason: String },
}

impl FetchError {
    pub fn transient(reason: impl Into<String>) -> Self {
        FetchError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        FetchError::Fatal {
            reason: reason.into(),
        }
    }
}

/// Problems with persisted scan state. Unlike per-keyword failures these halt
/// the scan.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Corrupt checkpoint at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("Checkpoint store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Checkpoint IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode checkpoint record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
