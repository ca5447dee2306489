use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A search term and the category it was seeded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub term: String,
    pub category: String,
}

impl Keyword {
    pub fn new(term: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            category: category.into(),
        }
    }

    /// Identity used for de-duplication and resume matching.
    pub fn key(&self) -> String {
        keyword_key(&self.term)
    }
}

pub fn keyword_key(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Flattens seed groups into the scan's keyword list, keeping the first
/// occurrence of every term (case-insensitive) and dropping blanks.
pub fn prepare_keyword_set<'a, I>(groups: I) -> Vec<Keyword>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for (category, terms) in groups {
        for term in terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if seen.insert(keyword_key(term)) {
                keywords.push(Keyword::new(term, category));
            }
        }
    }

    keywords
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Interest-over-time samples for one keyword, oldest first.
///
/// An empty series is a valid state meaning upstream had nothing to say.
/// Every stored value is finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SeriesPoints")]
pub struct RawSeries {
    points: Vec<SeriesPoint>,
}

#[derive(Deserialize)]
struct SeriesPoints {
    points: Vec<SeriesPoint>,
}

impl From<SeriesPoints> for RawSeries {
    fn from(raw: SeriesPoints) -> Self {
        Self::new(raw.points)
    }
}

impl RawSeries {
    /// Sorts by timestamp and drops NaN or infinite samples.
    pub fn new(mut points: Vec<SeriesPoint>) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        Self { points }
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(timestamp, value)| SeriesPoint { timestamp, value })
                .collect(),
        )
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    /// The sample closest to `target`, provided it lies within `tolerance`.
    /// On an exact tie the older sample wins.
    pub fn nearest(&self, target: DateTime<Utc>, tolerance: Duration) -> Option<&SeriesPoint> {
        let idx = self.points.partition_point(|p| p.timestamp < target);

        let before = idx.checked_sub(1).and_then(|i| self.points.get(i));
        let after = self.points.get(idx);

        let candidate = match (before, after) {
            (Some(b), Some(a)) => {
                if target - b.timestamp <= a.timestamp - target {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        let distance = if candidate.timestamp >= target {
            candidate.timestamp - target
        } else {
            target - candidate.timestamp
        };
        (distance <= tolerance).then_some(candidate)
    }
}

/// A named lookback window and its share of the recommendation score.
#[derive(Debug, Clone, PartialEq)]
pub struct Horizon {
    pub name: String,
    pub lookback: Duration,
    pub weight: f64,
}

impl Horizon {
    pub fn new(name: impl Into<String>, lookback: Duration, weight: f64) -> Self {
        Self {
            name: name.into(),
            lookback,
            weight,
        }
    }
}

/// Ordered horizons; order is preserved in every result record.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonSet {
    horizons: Vec<Horizon>,
}

impl HorizonSet {
    pub fn new(horizons: Vec<Horizon>) -> Self {
        Self { horizons }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Horizon> {
        self.horizons.iter()
    }

    pub fn len(&self) -> usize {
        self.horizons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.horizons.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Horizon> {
        self.horizons.iter().find(|h| h.name == name)
    }

    /// Longest lookback, i.e. the window a fetch has to cover.
    pub fn max_lookback(&self) -> Duration {
        self.horizons
            .iter()
            .map(|h| h.lookback)
            .max()
            .unwrap_or_else(Duration::zero)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonGrowth {
    pub horizon: String,
    pub growth_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Ok,
    Empty,
    Error,
    RateLimitedExhausted,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Ok => "ok",
            ScanStatus::Empty => "empty",
            ScanStatus::Error => "error",
            ScanStatus::RateLimitedExhausted => "rate_limited_exhausted",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatedQueries {
    pub top: Vec<String>,
    pub rising: Vec<String>,
}

impl RelatedQueries {
    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.rising.is_empty()
    }
}

/// Everything recorded about one keyword in one scan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResult {
    pub keyword: String,
    pub category: String,
    pub current_interest: Option<f64>,
    pub growth: Vec<HorizonGrowth>,
    pub score: Option<f64>,
    pub passes_threshold: bool,
    pub status: ScanStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub related: RelatedQueries,
    pub scanned_at: DateTime<Utc>,
}

impl KeywordResult {
    /// A record with no metrics, used for every non-`ok` terminal status.
    pub fn without_metrics(
        keyword: &Keyword,
        horizons: &HorizonSet,
        status: ScanStatus,
        error: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            keyword: keyword.term.clone(),
            category: keyword.category.clone(),
            current_interest: None,
            growth: horizons
                .iter()
                .map(|h| HorizonGrowth {
                    horizon: h.name.clone(),
                    growth_pct: None,
                })
                .collect(),
            score: None,
            passes_threshold: false,
            status,
            error,
            attempts,
            related: RelatedQueries::default(),
            scanned_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        keyword_key(&self.keyword)
    }

    pub fn growth_for(&self, horizon: &str) -> Option<f64> {
        self.growth
            .iter()
            .find(|g| g.horizon == horizon)
            .and_then(|g| g.growth_pct)
    }

    pub fn max_growth(&self) -> Option<f64> {
        self.growth
            .iter()
            .filter_map(|g| g.growth_pct)
            .fold(None, |acc: Option<f64>, g| Some(acc.map_or(g, |a| a.max(g))))
    }

    /// Eligible for the ranked output.
    pub fn is_ranked(&self) -> bool {
        self.passes_threshold && self.score.is_some()
    }
}
