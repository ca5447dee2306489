use async_trait::async_trait;
use crate::metrics::FetchMetrics;
use chrono::Duration;
use trendscout_core::{FetchError, HorizonSet, Keyword, RawSeries, RelatedQueries};

/// How far back a fetch has to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub lookback: Duration,
}

impl FetchWindow {
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    /// Window that covers the longest horizon.
    pub fn covering(horizons: &HorizonSet) -> Self {
        Self::new(horizons.max_lookback())
    }

    /// Smallest Google Trends date range that still covers the lookback.
    pub fn trends_date_range(&self) -> &'static str {
        match self.lookback.num_days() {
            d if d <= 7 => "now 7-d",
            d if d <= 30 => "today 1-m",
            d if d <= 90 => "today 3-m",
            d if d <= 365 => "today 12-m",
            d if d <= 5 * 365 => "today 5-y",
            _ => "all",
        }
    }
}

/// Uniform contract over whatever produces interest-over-time data.
///
/// Implementations make exactly one upstream call per method invocation and
/// never retry; pacing and retry policy belong to the caller.
#[async_trait]
pub trait TimeSeriesFetcher: Send + Sync {
    async fn fetch(&self, keyword: &Keyword, window: FetchWindow) -> Result<RawSeries, FetchError>;

    /// Top and rising related queries. Sources without the notion return
    /// nothing.
    async fn related(&self, _keyword: &Keyword) -> Result<RelatedQueries, FetchError> {
        Ok(RelatedQueries::default())
    }

    /// Request metrics gathered so far, for sources that keep them.
    async fn metrics(&self) -> Option<FetchMetrics> {
        None
    }

    fn name(&self) -> &'static str;
}
