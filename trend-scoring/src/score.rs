use crate::growth::GrowthCalculator;
use chrono::Utc;
use trendscout_core::{
    HorizonGrowth, HorizonSet, Keyword, KeywordResult, RawSeries, RelatedQueries, ScanConfig,
    ScanStatus,
};

/// Weighted recommendation score over the horizons that have a growth value.
///
/// Weights are renormalised over exactly the available horizons, so missing
/// long-horizon history does not drag a keyword down. Returns `None` when no
/// horizon is available (or the available ones carry no weight).
pub fn score(growth: &[HorizonGrowth], horizons: &HorizonSet) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;

    for entry in growth {
        let (Some(pct), Some(horizon)) = (entry.growth_pct, horizons.get(&entry.horizon)) else {
            continue;
        };
        weighted_sum += horizon.weight * pct;
        weight_sum += horizon.weight;
    }

    (weight_sum > 0.0).then(|| weighted_sum / weight_sum)
}

/// True when any single horizon reaches the threshold.
pub fn passes_threshold(growth: &[HorizonGrowth], threshold_pct: f64) -> bool {
    growth
        .iter()
        .filter_map(|g| g.growth_pct)
        .any(|pct| pct >= threshold_pct)
}

/// Turns a fetched series into a complete result record.
#[derive(Debug, Clone)]
pub struct TrendScorer {
    horizons: HorizonSet,
    calculator: GrowthCalculator,
    threshold_pct: f64,
}

impl TrendScorer {
    pub fn new(horizons: HorizonSet, calculator: GrowthCalculator, threshold_pct: f64) -> Self {
        Self {
            horizons,
            calculator,
            threshold_pct,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.horizon_set(),
            GrowthCalculator::new(config.growth_cap_pct, config.alignment_tolerance()),
            config.growth_threshold_pct,
        )
    }

    pub fn horizons(&self) -> &HorizonSet {
        &self.horizons
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// An empty series produces an `empty` record with no metrics.
    pub fn evaluate(&self, keyword: &Keyword, series: &RawSeries, attempts: u32) -> KeywordResult {
        let Some(latest) = series.latest() else {
            return KeywordResult::without_metrics(
                keyword,
                &self.horizons,
                ScanStatus::Empty,
                None,
                attempts,
            );
        };

        let growth = self.calculator.growth_by_horizon(series, &self.horizons);
        let score = score(&growth, &self.horizons);
        let passes = passes_threshold(&growth, self.threshold_pct);

        KeywordResult {
            keyword: keyword.term.clone(),
            category: keyword.category.clone(),
            current_interest: Some(latest.value),
            growth,
            score,
            passes_threshold: passes,
            status: ScanStatus::Ok,
            error: None,
            attempts,
            related: RelatedQueries::default(),
            scanned_at: Utc::now(),
        }
    }
}
