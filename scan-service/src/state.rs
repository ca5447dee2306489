use serde::Serialize;
use std::collections::HashSet;
use trendscout_core::{KeywordResult, ScanStatus};

/// Number of keywords per terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub empty: usize,
    pub error: usize,
    pub rate_limited_exhausted: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: ScanStatus) {
        match status {
            ScanStatus::Ok => self.ok += 1,
            ScanStatus::Empty => self.empty += 1,
            ScanStatus::Error => self.error += 1,
            ScanStatus::RateLimitedExhausted => self.rate_limited_exhausted += 1,
        }
    }

    pub fn get(&self, status: ScanStatus) -> usize {
        match status {
            ScanStatus::Ok => self.ok,
            ScanStatus::Empty => self.empty,
            ScanStatus::Error => self.error,
            ScanStatus::RateLimitedExhausted => self.rate_limited_exhausted,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.empty + self.error + self.rate_limited_exhausted
    }

    pub fn failures(&self) -> usize {
        self.error + self.rate_limited_exhausted
    }
}

/// Mutable bookkeeping for one scan run. Owned by the orchestrator loop.
#[derive(Debug)]
pub struct ScanState {
    processed: HashSet<String>,
    total: usize,
    cursor: usize,
    scanned: usize,
    skipped: usize,
    passing: usize,
    unflushed: usize,
    counts: StatusCounts,
}

impl ScanState {
    /// `processed` holds the keys already present in the checkpoint.
    pub fn new(total: usize, processed: HashSet<String>) -> Self {
        Self {
            processed,
            total,
            cursor: 0,
            scanned: 0,
            skipped: 0,
            passing: 0,
            unflushed: 0,
            counts: StatusCounts::default(),
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    /// Moves the cursor to the keyword at `index` (0-based).
    pub fn advance_to(&mut self, index: usize) {
        self.cursor = index;
    }

    /// 1-based position of the current keyword, for progress output.
    pub fn position(&self) -> usize {
        self.cursor + 1
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record(&mut self, result: &KeywordResult) {
        self.processed.insert(result.key());
        self.scanned += 1;
        self.unflushed += 1;
        self.counts.record(result.status);
        if result.is_ranked() {
            self.passing += 1;
        }
    }

    pub fn flush_due(&self, flush_every: usize) -> bool {
        self.unflushed >= flush_every.max(1)
    }

    pub fn mark_flushed(&mut self) {
        self.unflushed = 0;
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn passing(&self) -> usize {
        self.passing
    }

    /// Keywords neither skipped nor scanned yet.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.scanned + self.skipped)
    }

    /// Status counts for keywords scanned in this run only.
    pub fn counts(&self) -> StatusCounts {
        self.counts
    }
}
