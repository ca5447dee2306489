//! Scripted fetcher for frozen data and tests.
//!
//! Each keyword gets a queue of outcomes. Calls pop from the front; the last
//! outcome repeats once the queue is down to one entry. Unknown keywords are
//! `Empty`.

use crate::fetcher::{FetchWindow, TimeSeriesFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use trendscout_core::{
    keyword_key, CoreError, FetchError, Keyword, RawSeries, RelatedQueries, SeriesPoint,
};

type Outcome = Result<RawSeries, FetchError>;

#[derive(Debug, Default)]
pub struct FixtureFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    related: HashMap<String, RelatedQueries>,
    calls: Mutex<HashMap<String, u32>>,
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    #[serde(default)]
    points: Vec<SeriesPoint>,
    #[serde(default)]
    related: RelatedQueries,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads frozen series from a JSON object mapping each keyword to
    /// `{ "points": [{ "timestamp": ..., "value": ... }], "related": {...} }`.
    /// An empty `points` list replays as `Empty`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let entries: HashMap<String, FixtureEntry> = serde_json::from_str(raw)?;

        let mut fetcher = Self::new();
        for (term, entry) in entries {
            let outcome = if entry.points.is_empty() {
                Err(FetchError::Empty)
            } else {
                Ok(RawSeries::new(entry.points))
            };
            if !entry.related.is_empty() {
                fetcher = fetcher.with_related(&term, entry.related);
            }
            fetcher = fetcher.with_script(&term, vec![outcome]);
        }
        Ok(fetcher)
    }

    pub fn with_series(self, term: &str, series: RawSeries) -> Self {
        self.with_script(term, vec![Ok(series)])
    }

    pub fn with_script(self, term: &str, outcomes: Vec<Outcome>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(keyword_key(term), outcomes.into());
        }
        self
    }

    pub fn with_related(mut self, term: &str, related: RelatedQueries) -> Self {
        self.related.insert(keyword_key(term), related);
        self
    }

    /// Number of `fetch` calls made for a keyword so far.
    pub fn calls(&self, term: &str) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(&keyword_key(term)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    fn next_outcome(&self, key: &str) -> Outcome {
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| FetchError::fatal("fixture state poisoned"))?;

        match scripts.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Err(FetchError::Empty)),
            Some(queue) => queue.front().cloned().unwrap_or(Err(FetchError::Empty)),
            None => Err(FetchError::Empty),
        }
    }
}

#[async_trait]
impl TimeSeriesFetcher for FixtureFetcher {
    async fn fetch(&self, keyword: &Keyword, _window: FetchWindow) -> Result<RawSeries, FetchError> {
        let key = keyword.key();
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(key.clone()).or_insert(0) += 1;
        }

        let outcome = self.next_outcome(&key);
        debug!("Fixture outcome for '{}': {:?}", keyword.term, outcome.as_ref().map(|s| s.len()));
        outcome
    }

    async fn related(&self, keyword: &Keyword) -> Result<RelatedQueries, FetchError> {
        Ok(self.related.get(&keyword.key()).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn window() -> FetchWindow {
        FetchWindow::new(Duration::days(1825))
    }

    fn series() -> RawSeries {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        RawSeries::from_pairs(vec![(t - Duration::days(30), 50.0), (t, 75.0)])
    }

    #[test]
    fn test_script_pops_then_repeats_last() {
        let fetcher = FixtureFetcher::new().with_script(
            "Berberine",
            vec![Err(FetchError::transient("HTTP 429")), Ok(series())],
        );
        let keyword = Keyword::new("berberine", "supplements");

        let first = tokio_test::block_on(fetcher.fetch(&keyword, window()));
        assert!(matches!(first, Err(FetchError::Transient { .. })));

        for _ in 0..2 {
            let next = tokio_test::block_on(fetcher.fetch(&keyword, window()));
            assert_eq!(next.unwrap().len(), 2);
        }
        assert_eq!(fetcher.calls("BERBERINE"), 3);
    }

    #[tokio::test]
    async fn test_unknown_keyword_is_empty() {
        let fetcher = FixtureFetcher::new();
        let keyword = Keyword::new("nothing here", "misc");
        assert_eq!(fetcher.fetch(&keyword, window()).await, Err(FetchError::Empty));
        assert_eq!(fetcher.total_calls(), 1);
        assert!(fetcher.related(&keyword).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_json() {
        let raw = r#"{
            "gua sha": {
                "points": [
                    {"timestamp": "2024-05-01T00:00:00Z", "value": 40.0},
                    {"timestamp": "2024-06-01T00:00:00Z", "value": 92.0}
                ],
                "related": {"top": ["gua sha tool"], "rising": []}
            },
            "dead trend": {"points": []}
        }"#;

        let fetcher = FixtureFetcher::from_json_str(raw).unwrap();

        let gua_sha = Keyword::new("Gua Sha", "natural_beauty");
        let series = fetcher.fetch(&gua_sha, window()).await.unwrap();
        assert_eq!(series.latest().unwrap().value, 92.0);
        assert_eq!(fetcher.related(&gua_sha).await.unwrap().top, vec!["gua sha tool"]);

        let dead = Keyword::new("dead trend", "misc");
        assert_eq!(fetcher.fetch(&dead, window()).await, Err(FetchError::Empty));
    }
}
