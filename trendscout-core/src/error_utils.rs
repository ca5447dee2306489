use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Fetch(e) => {
                error!("Fetch error details: {:?}", e);
            }
            CoreError::Checkpoint(e) => {
                error!("Checkpoint error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Fetch(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Fetch(e) => e.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Fetch(e) => e.user_friendly_message(),
            CoreError::Checkpoint(CheckpointError::Corrupt { location, .. }) => format!(
                "The checkpoint at {} is unreadable. Move it aside or repair it before resuming.",
                location
            ),
            CoreError::Checkpoint(_) => {
                "The checkpoint store could not be used. The scan was stopped.".to_string()
            }
            CoreError::Config(ConfigError::MissingField { field }) => {
                format!("Configuration is missing the '{}' field.", field)
            }
            CoreError::Config(e) => format!("Configuration problem: {}", e),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Fetch(_) => "FETCH".to_string(),
            CoreError::Checkpoint(_) => "CHECKPOINT".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for FetchError {
    fn log_error(&self) -> &Self {
        error!("FetchError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("FetchError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            FetchError::Empty => "The trend source has no data for this keyword.".to_string(),
            FetchError::Transient { reason, .. } => format!(
                "The trend source is busy or unreachable ({}). Retrying later.",
                reason
            ),
            FetchError::Fatal { reason } => format!("The trend source rejected the request: {}", reason),
        }
    }

    fn error_code(&self) -> String {
        match self {
            FetchError::Empty => "FETCH_EMPTY".to_string(),
            FetchError::Transient { .. } => "FETCH_TRANSIENT".to_string(),
            FetchError::Fatal { .. } => "FETCH_FATAL".to_string(),
        }
    }
}
