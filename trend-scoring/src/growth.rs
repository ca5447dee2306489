//! Multi-horizon growth from a raw interest series.
//!
//! Pure functions of their inputs: no clock, no I/O. "Now" is the most recent
//! sample in the series.

use chrono::Duration;
use trendscout_core::{Horizon, HorizonGrowth, HorizonSet, RawSeries};

/// Percentage change from `baseline` to `current`.
///
/// A zero baseline yields `cap_pct` for any positive current value and 0 when
/// both are zero. Growth is clamped to `cap_pct` from above only; a collapse
/// to zero is -100%.
pub fn growth_pct(current: f64, baseline: f64, cap_pct: f64) -> f64 {
    if baseline <= 0.0 {
        return if current > 0.0 { cap_pct } else { 0.0 };
    }
    ((current - baseline) / baseline * 100.0).min(cap_pct)
}

#[derive(Debug, Clone)]
pub struct GrowthCalculator {
    cap_pct: f64,
    alignment_tolerance: Duration,
}

impl GrowthCalculator {
    pub fn new(cap_pct: f64, alignment_tolerance: Duration) -> Self {
        Self {
            cap_pct,
            alignment_tolerance,
        }
    }

    pub fn cap_pct(&self) -> f64 {
        self.cap_pct
    }

    /// Growth over one horizon, or `None` when the series has no sample close
    /// enough to the horizon's baseline instant.
    pub fn growth(&self, series: &RawSeries, horizon: &Horizon) -> Option<f64> {
        let latest = series.latest()?;
        let target = latest.timestamp.checked_sub_signed(horizon.lookback)?;
        let baseline = series.nearest(target, self.alignment_tolerance)?;

        // The latest sample cannot be its own baseline
        if baseline.timestamp >= latest.timestamp {
            return None;
        }
        if !latest.value.is_finite() || !baseline.value.is_finite() {
            return None;
        }

        Some(growth_pct(latest.value, baseline.value, self.cap_pct))
    }

    pub fn growth_by_horizon(&self, series: &RawSeries, horizons: &HorizonSet) -> Vec<HorizonGrowth> {
        horizons
            .iter()
            .map(|horizon| HorizonGrowth {
                horizon: horizon.name.clone(),
                growth_pct: self.growth(series, horizon),
            })
            .collect()
    }
}
