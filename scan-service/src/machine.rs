//! Lifecycle of a single keyword within a scan.
//!
//! ```text
//! Pending -> Fetching -> Scored | EmptyTerminal | FatalTerminal
//!               ^   \
//!               |    Retrying (transient failure, attempts left)
//!               +----/
//! Fetching on the last allowed attempt fails transiently -> RateLimitedTerminal
//! ```
//!
//! Transitions are pure; waiting and I/O belong to the orchestrator.

use std::time::Duration;
use trendscout_core::{FetchError, RawSeries};

#[derive(Debug, Clone, PartialEq)]
pub enum KeywordPhase {
    Pending,
    /// `attempt` is 1-based.
    Fetching { attempt: u32 },
    Retrying {
        attempt: u32,
        reason: String,
        retry_after: Option<Duration>,
    },
    Scored(RawSeries),
    EmptyTerminal,
    FatalTerminal { reason: String },
    RateLimitedTerminal { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    Start,
    Fetched(Result<RawSeries, FetchError>),
    BackoffScheduled,
}

impl KeywordPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KeywordPhase::Scored(_)
                | KeywordPhase::EmptyTerminal
                | KeywordPhase::FatalTerminal { .. }
                | KeywordPhase::RateLimitedTerminal { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeywordPhase::Pending => "pending",
            KeywordPhase::Fetching { .. } => "fetching",
            KeywordPhase::Retrying { .. } => "retrying",
            KeywordPhase::Scored(_) => "scored",
            KeywordPhase::EmptyTerminal => "empty",
            KeywordPhase::FatalTerminal { .. } => "fatal",
            KeywordPhase::RateLimitedTerminal { .. } => "rate_limited",
        }
    }
}

/// Applies one event. Events that do not apply to the current phase leave it
/// unchanged; terminal phases absorb everything.
pub fn advance(phase: KeywordPhase, event: PhaseEvent, max_attempts: u32) -> KeywordPhase {
    match (phase, event) {
        (KeywordPhase::Pending, PhaseEvent::Start) => KeywordPhase::Fetching { attempt: 1 },

        (KeywordPhase::Fetching { attempt }, PhaseEvent::Fetched(outcome)) => match outcome {
            Ok(series) if series.is_empty() => KeywordPhase::EmptyTerminal,
            Ok(series) => KeywordPhase::Scored(series),
            Err(FetchError::Empty) => KeywordPhase::EmptyTerminal,
            Err(FetchError::Fatal { reason }) => KeywordPhase::FatalTerminal { reason },
            Err(FetchError::Transient { reason, .. }) if attempt >= max_attempts => {
                KeywordPhase::RateLimitedTerminal {
                    reason: format!("Max retries ({}): {}", attempt, reason),
                }
            }
            Err(FetchError::Transient {
                reason,
                retry_after,
            }) => KeywordPhase::Retrying {
                attempt,
                reason,
                retry_after,
            },
        },

        (KeywordPhase::Retrying { attempt, .. }, PhaseEvent::BackoffScheduled) => {
            KeywordPhase::Fetching {
                attempt: attempt + 1,
            }
        }

        (phase, _) => phase,
    }
}
