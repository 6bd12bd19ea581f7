//! Engine configuration.
//!
//! Every component has its own config struct with documented defaults. The
//! whole tree can be loaded from TOML; missing tables and keys fall back to
//! the defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [aggregator]
//! grid_size = 12
//! recency_window_secs = 2592000  # 30 days
//!
//! [aggregator.thresholds]
//! low_max = 5
//! medium_max = 10
//!
//! [cache]
//! ttl_secs = 30
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Longest accepted recency window: 100 years.
pub const MAX_RECENCY_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;
/// Longest accepted cache entry lifetime: one day.
pub const MAX_CACHE_TTL_SECS: f64 = 86_400.0;
/// Shortest accepted distance between route samples.
pub const MIN_SAMPLE_STEP_METERS: f64 = 1.0;

/// Spatial index tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Bucket edge length in degrees (default: 0.01°, roughly 1.1 km of latitude)
    pub bucket_size_degrees: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { bucket_size_degrees: 0.01 }
    }
}

/// Incident-count thresholds shared by cell classification and the area verdict.
///
/// `1..=low_max` is low, `low_max+1..=medium_max` is medium, anything above is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low_max: u32,
    pub medium_max: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low_max: 5,
            medium_max: 10,
        }
    }
}

/// Risk aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Cells per side of the N×N grid (default: 10)
    pub grid_size: u32,
    /// Largest accepted query area in km² (default: 2500, about 50×50 km)
    pub max_area_km2: f64,
    /// Ignore incidents older than this many seconds. `None` keeps everything.
    pub recency_window_secs: Option<u64>,
    pub thresholds: RiskThresholds,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            grid_size: 10,
            max_area_km2: 2500.0,
            recency_window_secs: None,
            thresholds: RiskThresholds::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn recency_window(&self) -> Option<chrono::Duration> {
        self.recency_window_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}

/// Heatmap cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Grid the cache key is snapped to, in degrees (default: 0.01°)
    pub quantum_degrees: f64,
    /// Entry lifetime in seconds, at most one day (default: 60)
    pub ttl_secs: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quantum_degrees: 0.01,
            ttl_secs: 60.0,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        let secs = self.ttl_secs.clamp(0.0, MAX_CACHE_TTL_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

/// Penalty applied to a route sample per zone level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 3.0,
            high: 9.0,
        }
    }
}

/// Route risk scoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Distance between samples along a route, at least 1m (default: 50m)
    pub sample_step_meters: f64,
    /// Minimum samples per route, for very short routes (default: 10)
    pub min_samples: u32,
    /// Margin added around the routes when fetching zones (default: 100m)
    pub envelope_margin_meters: f64,
    pub weights: SeverityWeights,
    /// Scores strictly below this are "Safe" (default: 0.5)
    pub safe_below: f64,
    /// Scores strictly below this (and not safe) are "Caution" (default: 2.0)
    pub caution_below: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            sample_step_meters: 50.0,
            min_samples: 10,
            envelope_margin_meters: 100.0,
            weights: SeverityWeights::default(),
            safe_below: 0.5,
            caution_below: 2.0,
        }
    }
}

/// Nearest-responder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Results returned when the caller gives no limit (default: 1)
    pub default_limit: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self { default_limit: 1 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub aggregator: AggregatorConfig,
    pub cache: CacheConfig,
    pub scorer: ScorerConfig,
    pub responders: ResponderConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!("{name} must be positive, got {value}")))
            }
        }

        positive("index.bucket_size_degrees", self.index.bucket_size_degrees)?;
        positive("aggregator.max_area_km2", self.aggregator.max_area_km2)?;
        positive("cache.quantum_degrees", self.cache.quantum_degrees)?;
        positive("scorer.sample_step_meters", self.scorer.sample_step_meters)?;
        if self.scorer.sample_step_meters < MIN_SAMPLE_STEP_METERS {
            return Err(EngineError::InvalidConfig(format!(
                "scorer.sample_step_meters must be >= {MIN_SAMPLE_STEP_METERS}, got {}",
                self.scorer.sample_step_meters
            )));
        }

        if let Some(secs) = self.aggregator.recency_window_secs {
            if secs > MAX_RECENCY_WINDOW_SECS {
                return Err(EngineError::InvalidConfig(format!(
                    "aggregator.recency_window_secs must be <= {MAX_RECENCY_WINDOW_SECS}, got {secs}"
                )));
            }
        }

        if !(2..=64).contains(&self.aggregator.grid_size) {
            return Err(EngineError::InvalidConfig(format!(
                "aggregator.grid_size must be within 2..=64, got {}",
                self.aggregator.grid_size
            )));
        }

        let thresholds = &self.aggregator.thresholds;
        if thresholds.low_max == 0 || thresholds.medium_max <= thresholds.low_max {
            return Err(EngineError::InvalidConfig(format!(
                "thresholds must satisfy 0 < low_max < medium_max, got {} / {}",
                thresholds.low_max, thresholds.medium_max
            )));
        }

        if !(0.0..=MAX_CACHE_TTL_SECS).contains(&self.cache.ttl_secs) {
            return Err(EngineError::InvalidConfig(format!(
                "cache.ttl_secs must be within 0..={MAX_CACHE_TTL_SECS}, got {}",
                self.cache.ttl_secs
            )));
        }

        if self.scorer.min_samples < 2 {
            return Err(EngineError::InvalidConfig("scorer.min_samples must be >= 2".to_string()));
        }

        if !(self.scorer.safe_below <= self.scorer.caution_below) {
            return Err(EngineError::InvalidConfig(
                "scorer.safe_below must not exceed scorer.caution_below".to_string(),
            ));
        }

        if !self.scorer.envelope_margin_meters.is_finite() || self.scorer.envelope_margin_meters < 0.0 {
            return Err(EngineError::InvalidConfig(
                "scorer.envelope_margin_meters must be >= 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [aggregator]
            grid_size = 12
            recency_window_secs = 3600

            [aggregator.thresholds]
            low_max = 2

            [cache]
            ttl_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.aggregator.grid_size, 12);
        assert_eq!(config.aggregator.thresholds.low_max, 2);
        assert_eq!(config.aggregator.thresholds.medium_max, 10);
        assert_eq!(config.aggregator.recency_window(), Some(chrono::Duration::hours(1)));
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
        assert_eq!(config.scorer, ScorerConfig::default());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [aggregator.thresholds]
            low_max = 10
            medium_max = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_grid_size_rejected() {
        let mut config = EngineConfig::default();
        config.aggregator.grid_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut config = EngineConfig::default();
        config.aggregator.recency_window_secs = Some(10_000_000_000_000);
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.aggregator.recency_window_secs = Some(MAX_RECENCY_WINDOW_SECS);
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.cache.ttl_secs = 1e20;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.cache.ttl_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scorer.sample_step_meters = 1e-300;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_ttl_never_panics_on_unvalidated_values() {
        let mut cache = CacheConfig::default();
        cache.ttl_secs = 1e20;
        assert_eq!(cache.ttl(), Duration::from_secs(86_400));
        cache.ttl_secs = f64::NAN;
        assert_eq!(cache.ttl(), Duration::ZERO);
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = EngineConfig::from_toml_str("[cache\nttl_secs = ").unwrap_err();
        assert!(err.is_validation());
    }
}
