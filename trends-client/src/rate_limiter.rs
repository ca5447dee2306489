use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use trendscout_core::RateLimitSettings;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    pub penalty_base: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    pub jitter_factor: f64,
}

impl RateLimitConfig {
    pub fn google_trends() -> Self {
        Self {
            min_interval: Duration::from_secs(18), // Unofficial endpoints throttle hard below ~15s
            penalty_base: Duration::from_secs(45),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(600),
            max_attempts: 3,
            jitter_factor: 0.1,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::google_trends()
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(settings.min_interval_secs),
            penalty_base: Duration::from_secs_f64(settings.penalty_base_secs),
            backoff_multiplier: settings.backoff_multiplier,
            max_backoff: Duration::from_secs_f64(settings.max_backoff_secs),
            max_attempts: settings.max_attempts,
            jitter_factor: settings.jitter_factor,
        }
    }
}

/// Backoff for the `level`-th consecutive penalty (1-based), jittered and
/// capped at `max_backoff`.
pub fn calculate_penalty(level: u32, config: &RateLimitConfig) -> Duration {
    let base_ms = config.penalty_base.as_millis() as f64;
    let max_ms = config.max_backoff.as_millis() as u64;

    let exponent = level.saturating_sub(1) as i32;
    let delay_ms = (base_ms * config.backoff_multiplier.powi(exponent)) as u64;
    let exponential_delay = Duration::from_millis(delay_ms.min(max_ms));

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..=jitter_range)
    } else {
        0
    };

    (exponential_delay + Duration::from_millis(jitter)).min(config.max_backoff)
}

/// Single-flight request pacing.
///
/// Owned by exactly one scan loop. Every upstream call is preceded by
/// [`RateLimiter::acquire`]; a rate-limit signal from upstream is reported
/// with [`RateLimiter::penalize`], which pushes the next permitted request
/// further out.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    last_request: Option<Instant>,
    blocked_until: Option<Instant>,
    penalty_level: u32,
    requests_made: u64,
    penalties: u64,
    total_wait: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_request: None,
            blocked_until: None,
            penalty_level: 0,
            requests_made: 0,
            penalties: 0,
            total_wait: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Earliest instant the next request may go out, if any constraint applies.
    pub fn next_ready_at(&self) -> Option<Instant> {
        let spacing = self.last_request.map(|t| t + self.config.min_interval);
        match (spacing, self.blocked_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Waits until a request is allowed and records it. Returns the time spent
    /// waiting.
    pub async fn acquire(&mut self) -> Duration {
        let start = Instant::now();

        if let Some(ready_at) = self.next_ready_at() {
            if ready_at > start {
                debug!("Rate limiter holding request for {:?}", ready_at - start);
                sleep_until(ready_at).await;
            }
        }

        let now = Instant::now();
        self.last_request = Some(now);
        self.blocked_until = None;
        self.requests_made += 1;

        let waited = now - start;
        self.total_wait += waited;
        waited
    }

    /// Schedules a backoff after an upstream rate-limit or transient failure.
    /// Consecutive penalties grow the delay; an upstream hint wins when longer.
    pub fn penalize(&mut self, retry_after: Option<Duration>) -> Duration {
        self.penalty_level += 1;
        self.penalties += 1;

        let mut delay = calculate_penalty(self.penalty_level, &self.config);
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }

        self.blocked_until = Some(Instant::now() + delay);
        warn!(
            "Upstream pushed back (penalty level {}), backing off for {:?}",
            self.penalty_level, delay
        );
        delay
    }

    /// Clears the consecutive-penalty level after a non-transient outcome.
    pub fn reset_penalty(&mut self) {
        if self.penalty_level > 0 {
            debug!("Rate limiter penalty level reset from {}", self.penalty_level);
        }
        self.penalty_level = 0;
    }

    pub fn penalty_level(&self) -> u32 {
        self.penalty_level
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        RateLimitStatus {
            requests_made: self.requests_made,
            penalties: self.penalties,
            penalty_level: self.penalty_level,
            total_wait: self.total_wait,
            next_request_in: self
                .next_ready_at()
                .filter(|t| *t > now)
                .map(|t| t - now),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStatus {
    pub requests_made: u64,
    pub penalties: u64,
    pub penalty_level: u32,
    pub total_wait: Duration,
    pub next_request_in: Option<Duration>,
}

impl RateLimitStatus {
    pub fn is_backing_off(&self) -> bool {
        self.penalty_level > 0
    }
}
