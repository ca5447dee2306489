//! Scan configuration.
//!
//! Read once from TOML at scan start and validated; the scan treats the result
//! as immutable.

use crate::error::ConfigError;
use crate::types::{prepare_keyword_set, Horizon, HorizonSet, Keyword};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
/// Upper bound for horizon lookbacks and the alignment tolerance.
const MAX_LOOKBACK_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonConfig {
    pub name: String,
    pub days: i64,
    pub weight: f64,
}

impl HorizonConfig {
    fn new(name: &str, days: i64, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            days,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Minimum spacing between any two upstream requests
    pub min_interval_secs: f64,
    /// First backoff after a rate-limit signal
    pub penalty_base_secs: f64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: f64,
    /// Fetch attempts per keyword before it is abandoned
    pub max_attempts: u32,
    /// Random extra delay as a fraction of the penalty (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: 18.0,
            penalty_base_secs: 45.0,
            backoff_multiplier: 2.0,
            max_backoff_secs: 600.0,
            max_attempts: 3,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub backend: CheckpointBackend,
    pub path: PathBuf,
    /// Flush after this many keywords
    pub flush_every: usize,
    pub archive_on_complete: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Jsonl,
            path: PathBuf::from("scan_checkpoint.jsonl"),
            flush_every: 5,
            archive_on_complete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub geo: String,
    pub request_timeout_secs: u64,
    /// Also collect top and rising related queries for scored keywords
    pub include_related: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            geo: "US".to_string(),
            request_timeout_secs: 30,
            include_related: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub category: String,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub horizons: Vec<HorizonConfig>,
    pub growth_threshold_pct: f64,
    pub growth_cap_pct: f64,
    pub alignment_tolerance_days: i64,
    pub rate_limit: RateLimitSettings,
    pub checkpoint: CheckpointSettings,
    pub fetch: FetchSettings,
    pub keywords: Vec<KeywordGroup>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            horizons: vec![
                HorizonConfig::new("1mo", 30, 0.30),
                HorizonConfig::new("3mo", 90, 0.25),
                HorizonConfig::new("6mo", 180, 0.20),
                HorizonConfig::new("1yr", 365, 0.15),
                HorizonConfig::new("5yr", 1825, 0.10),
            ],
            growth_threshold_pct: 300.0,
            growth_cap_pct: 10_000.0,
            alignment_tolerance_days: 7,
            rate_limit: RateLimitSettings::default(),
            checkpoint: CheckpointSettings::default(),
            fetch: FetchSettings::default(),
            keywords: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ScanConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizons.is_empty() {
            return Err(ConfigError::MissingField {
                field: "horizons".to_string(),
            });
        }

        let mut names = HashSet::new();
        for horizon in &self.horizons {
            if !names.insert(horizon.name.as_str()) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("duplicate horizon '{}'", horizon.name),
                });
            }
            if horizon.days <= 0 || horizon.days > MAX_LOOKBACK_DAYS {
                return Err(ConfigError::InvalidValue {
                    field: format!("horizons.{}.days", horizon.name),
                    value: horizon.days.to_string(),
                });
            }
            if !horizon.weight.is_finite() || horizon.weight < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("horizons.{}.weight", horizon.name),
                    value: horizon.weight.to_string(),
                });
            }
        }

        let weight_sum: f64 = self.horizons.iter().map(|h| h.weight).sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::ValidationFailed {
                reason: format!("horizon weights sum to {}, expected 1.0", weight_sum),
            });
        }

        if !self.growth_cap_pct.is_finite() || self.growth_cap_pct <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "growth_cap_pct".to_string(),
                value: self.growth_cap_pct.to_string(),
            });
        }
        if !self.growth_threshold_pct.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "growth_threshold_pct".to_string(),
                value: self.growth_threshold_pct.to_string(),
            });
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.alignment_tolerance_days) {
            return Err(ConfigError::InvalidValue {
                field: "alignment_tolerance_days".to_string(),
                value: self.alignment_tolerance_days.to_string(),
            });
        }

        let rl = &self.rate_limit;
        if rl.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        for (field, value) in [
            ("rate_limit.min_interval_secs", rl.min_interval_secs),
            ("rate_limit.penalty_base_secs", rl.penalty_base_secs),
            ("rate_limit.max_backoff_secs", rl.max_backoff_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if !rl.backoff_multiplier.is_finite() || rl.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.backoff_multiplier".to_string(),
                value: rl.backoff_multiplier.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&rl.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.jitter_factor".to_string(),
                value: rl.jitter_factor.to_string(),
            });
        }

        if self.checkpoint.flush_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "checkpoint.flush_every".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    pub fn horizon_set(&self) -> HorizonSet {
        HorizonSet::new(
            self.horizons
                .iter()
                .map(|h| Horizon::new(h.name.clone(), Duration::days(h.days), h.weight))
                .collect(),
        )
    }

    pub fn alignment_tolerance(&self) -> Duration {
        Duration::days(self.alignment_tolerance_days)
    }

    pub fn keyword_set(&self) -> Vec<Keyword> {
        prepare_keyword_set(
            self.keywords
                .iter()
                .map(|group| (group.category.as_str(), group.terms.as_slice())),
        )
    }
}
