//! Sequential, resumable scan over a keyword set.
//!
//! One keyword at a time, in input order: pace through the rate limiter,
//! fetch, score, append to the checkpoint. Per-keyword failures are recorded
//! and the scan moves on; only checkpoint problems stop it. An operator abort
//! is observed between keywords and during every wait, and leaves the
//! checkpoint flushed and resumable.

use crate::machine::{advance, KeywordPhase, PhaseEvent};
use crate::report::ScanReport;
use crate::state::ScanState;
use checkpoint_store::CheckpointStore;
use tokio::sync::watch;
use trend_scoring::{rank_results, TrendScorer};
use tracing::{debug, error, info, warn};
use trends_client::{FetchWindow, RateLimitConfig, RateLimiter, TimeSeriesFetcher};
use trendscout_core::{
    CoreError, ErrorExt, FetchError, Keyword, KeywordResult, RawSeries, ScanConfig, ScanStatus,
};

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// Aborted by the operator. Everything recorded so far is flushed.
    Interrupted { scanned: usize, remaining: usize },
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub flush_every: usize,
    pub include_related: bool,
    pub archive_on_complete: bool,
}

impl From<&ScanConfig> for OrchestratorSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            flush_every: config.checkpoint.flush_every,
            include_related: config.fetch.include_related,
            archive_on_complete: config.checkpoint.archive_on_complete,
        }
    }
}

pub struct ScanOrchestrator<F, C> {
    fetcher: F,
    store: C,
    limiter: RateLimiter,
    scorer: TrendScorer,
    window: FetchWindow,
    settings: OrchestratorSettings,
    shutdown: watch::Receiver<bool>,
}

impl<F, C> ScanOrchestrator<F, C>
where
    F: TimeSeriesFetcher,
    C: CheckpointStore,
{
    pub fn new(
        fetcher: F,
        store: C,
        limiter: RateLimiter,
        scorer: TrendScorer,
        settings: OrchestratorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let window = FetchWindow::covering(scorer.horizons());
        Self {
            fetcher,
            store,
            limiter,
            scorer,
            window,
            settings,
            shutdown,
        }
    }

    pub fn from_config(
        config: &ScanConfig,
        fetcher: F,
        store: C,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::new(
            fetcher,
            store,
            RateLimiter::new(RateLimitConfig::from(&config.rate_limit)),
            TrendScorer::from_config(config),
            OrchestratorSettings::from(config),
            shutdown,
        )
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store_mut(&mut self) -> &mut C {
        &mut self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Runs the scan to completion or until shutdown is signalled.
    pub async fn run(&mut self, keywords: &[Keyword]) -> Result<ScanOutcome, CoreError> {
        let existing = match self.store.load_existing().await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Refusing to scan on top of an unreadable checkpoint");
                let e = CoreError::from(e);
                e.log_error();
                return Err(e);
            }
        };

        let mut state = ScanState::new(keywords.len(), existing);
        info!(
            "Scanning {} keywords with the {} fetcher into a {} checkpoint (window {})",
            keywords.len(),
            self.fetcher.name(),
            self.store.backend_type(),
            self.window.trends_date_range()
        );

        for (index, keyword) in keywords.iter().enumerate() {
            state.advance_to(index);

            if state.is_processed(&keyword.key()) {
                state.record_skipped();
                debug!("Skipping '{}', already in checkpoint", keyword.term);
                continue;
            }
            if self.shutdown_requested() {
                return self.interrupt(&state).await;
            }

            let Some(result) = self.scan_keyword(keyword).await else {
                return self.interrupt(&state).await;
            };

            log_progress(&state, &result);
            state.record(&result);
            self.store.append(result).await?;

            if state.flush_due(self.settings.flush_every) {
                self.store.flush().await?;
                state.mark_flushed();
            }
        }

        if state.skipped() > 0 {
            info!("Resumed scan: {} keywords came from the checkpoint", state.skipped());
        }

        let log = self.store.read_all().await?;
        state.mark_flushed();
        let ranked = rank_results(log.clone(), keywords);
        let mut report = ScanReport::new(
            ranked,
            &log,
            keywords.len(),
            state.scanned(),
            state.skipped(),
        );

        let counts = report.status_counts;
        info!(
            "Scan complete: {} passing, {} ok, {} empty, {} error, {} rate limited",
            report.passing_count(),
            counts.ok,
            counts.empty,
            counts.error,
            counts.rate_limited_exhausted
        );

        if self.settings.archive_on_complete {
            report.archived_to = self.store.archive().await?;
        }

        Ok(ScanOutcome::Completed(report))
    }

    /// Drives one keyword to a terminal phase. `None` means shutdown was
    /// requested before a result existed.
    async fn scan_keyword(&mut self, keyword: &Keyword) -> Option<KeywordResult> {
        let max_attempts = self.limiter.config().max_attempts.max(1);
        let mut phase = KeywordPhase::Pending;
        let mut attempts = 0;

        loop {
            phase = match phase {
                KeywordPhase::Pending => advance(phase, PhaseEvent::Start, max_attempts),
                KeywordPhase::Fetching { attempt } => {
                    if !self.wait_for_slot().await {
                        return None;
                    }
                    attempts = attempt;
                    debug!(
                        "Fetching '{}' (attempt {}/{})",
                        keyword.term, attempt, max_attempts
                    );

                    let outcome = self.fetcher.fetch(keyword, self.window).await;
                    match &outcome {
                        Err(FetchError::Transient { retry_after, .. }) => {
                            self.limiter.penalize(*retry_after);
                        }
                        _ => self.limiter.reset_penalty(),
                    }
                    advance(phase, PhaseEvent::Fetched(outcome), max_attempts)
                }
                KeywordPhase::Retrying {
                    attempt,
                    ref reason,
                    ..
                } => {
                    warn!(
                        "'{}' attempt {}/{} failed ({}), retrying after backoff",
                        keyword.term, attempt, max_attempts, reason
                    );
                    advance(phase, PhaseEvent::BackoffScheduled, max_attempts)
                }
                KeywordPhase::Scored(series) => {
                    return Some(self.scored(keyword, &series, attempts).await);
                }
                KeywordPhase::EmptyTerminal => {
                    return Some(self.unscored(keyword, ScanStatus::Empty, None, attempts));
                }
                KeywordPhase::FatalTerminal { reason } => {
                    warn!("'{}' failed: {}", keyword.term, reason);
                    return Some(self.unscored(keyword, ScanStatus::Error, Some(reason), attempts));
                }
                KeywordPhase::RateLimitedTerminal { reason } => {
                    warn!("Giving up on '{}': {}", keyword.term, reason);
                    return Some(self.unscored(
                        keyword,
                        ScanStatus::RateLimitedExhausted,
                        Some(reason),
                        attempts,
                    ));
                }
            };
        }
    }

    async fn scored(&mut self, keyword: &Keyword, series: &RawSeries, attempts: u32) -> KeywordResult {
        let mut result = self.scorer.evaluate(keyword, series, attempts);

        // Related queries are best effort and never change the outcome
        if self.settings.include_related && self.wait_for_slot().await {
            match self.fetcher.related(keyword).await {
                Ok(related) => result.related = related,
                Err(e) => {
                    if let FetchError::Transient { retry_after, .. } = &e {
                        self.limiter.penalize(*retry_after);
                    }
                    debug!("Related queries for '{}' unavailable: {}", keyword.term, e);
                }
            }
        }

        result
    }

    fn unscored(
        &self,
        keyword: &Keyword,
        status: ScanStatus,
        error: Option<String>,
        attempts: u32,
    ) -> KeywordResult {
        KeywordResult::without_metrics(keyword, self.scorer.horizons(), status, error, attempts)
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits for the rate limiter. Returns false if shutdown arrived first.
    async fn wait_for_slot(&mut self) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return false;
        }

        tokio::select! {
            _ = self.limiter.acquire() => true,
            _ = shutdown_signalled(&mut shutdown) => false,
        }
    }

    async fn interrupt(&mut self, state: &ScanState) -> Result<ScanOutcome, CoreError> {
        self.store.flush().await?;
        warn!(
            "Scan interrupted at keyword {}/{}; {} scanned this run, checkpoint flushed. Re-run to resume.",
            state.position(),
            state.total(),
            state.scanned()
        );
        Ok(ScanOutcome::Interrupted {
            scanned: state.scanned(),
            remaining: state.remaining(),
        })
    }
}

async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can ask us to stop any more
            std::future::pending::<()>().await;
        }
    }
}

fn log_progress(state: &ScanState, result: &KeywordResult) {
    let position = format!("({}/{})", state.position(), state.total());
    match result.status {
        ScanStatus::Ok => {
            let growth = result
                .max_growth()
                .map(|g| format!("{:+.0}%", g))
                .unwrap_or_else(|| "n/a".to_string());
            let flag = if result.passes_threshold { " PASSES" } else { "" };
            info!(
                "{} {} [{}]: interest {:.0}, max growth {}{}",
                position,
                result.keyword,
                result.category,
                result.current_interest.unwrap_or_default(),
                growth,
                flag
            );
        }
        status => info!(
            "{} {} [{}]: {}{}",
            position,
            result.keyword,
            result.category,
            status,
            result
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        ),
    }
}
