//! Engine configuration from environment variables and a thresholds TOML file

use crate::error::Result;
use crate::store::types::Dimension;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Runtime configuration for the engine and CLI
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Rows per normalization shard
    pub shard_rows: usize,

    /// Default trailing window for coverage, simulation and config reports
    pub window_days: u32,

    /// Default trailing window for signal detection
    pub signal_window_days: u32,

    /// Optional thresholds TOML file
    pub thresholds_path: Option<String>,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `QPSFLOW_DB_PATH` (default: qpsflow.db)
    /// - `QPSFLOW_SHARD_ROWS` (default: 5000)
    /// - `QPSFLOW_WINDOW_DAYS` (default: 7)
    /// - `QPSFLOW_SIGNAL_WINDOW_DAYS` (default: 7)
    /// - `QPSFLOW_THRESHOLDS` (default: unset, built-in thresholds)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("QPSFLOW_DB_PATH").unwrap_or_else(|_| "qpsflow.db".to_string()),

            shard_rows: env::var("QPSFLOW_SHARD_ROWS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(5_000),

            window_days: env::var("QPSFLOW_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(7),

            signal_window_days: env::var("QPSFLOW_SIGNAL_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(7),

            thresholds_path: env::var("QPSFLOW_THRESHOLDS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Thresholds from `thresholds_path`, or the built-in defaults when unset.
    pub fn load_thresholds(&self) -> Result<Thresholds> {
        match &self.thresholds_path {
            Some(path) => Thresholds::load(path),
            None => Ok(Thresholds::default()),
        }
    }
}

/// Whether coverage volume thresholds compare the window total or the daily mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeBasis {
    WindowTotal,
    DailyAverage,
}

/// Every tunable number in one place. Each section defaults independently.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub coverage: CoverageThresholds,
    pub signals: SignalThresholds,
    pub configs: ConfigThresholds,
    pub geo: GeoThresholds,
    pub ingest: IngestSettings,
}

impl Thresholds {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let thresholds = Self::from_toml(&text)?;
        log::info!("⚙️  Loaded thresholds from {}", path.as_ref().display());
        Ok(thresholds)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoverageThresholds {
    pub high_volume: i64,
    pub medium_volume: i64,
    pub volume_basis: VolumeBasis,
    /// Max per-dimension pixel distance for a near-miss inventory size
    pub near_miss_px: u32,
    /// Sizes the routing layer can target. `None` = any well-formed WxH.
    pub addressable_sizes: Option<Vec<String>>,
    pub top_opportunities: usize,
    /// Fewer distinct traffic days than this marks the report insufficient
    pub min_observed_days: u32,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            high_volume: 10_000,
            medium_volume: 1_000,
            volume_basis: VolumeBasis::WindowTotal,
            near_miss_px: 2,
            addressable_sizes: None,
            top_opportunities: 10,
            min_observed_days: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalThresholds {
    /// Dimensions forming the signal key
    pub key_dimensions: Vec<Dimension>,
    pub medium_occurrences: u32,
    pub high_occurrences: u32,
    /// Magnitude ratio at which confidence moves up one level
    pub escalation_multiple: f64,
    pub extreme_ctr_absolute: f64,
    pub extreme_ctr_baseline_multiple: f64,
    pub extreme_ctr_min_impressions: i64,
    pub zero_engagement_min_impressions: i64,
    pub zero_engagement_min_days: u32,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            key_dimensions: vec![Dimension::App],
            medium_occurrences: 2,
            high_occurrences: 4,
            escalation_multiple: 2.0,
            extreme_ctr_absolute: 0.10,
            extreme_ctr_baseline_multiple: 10.0,
            extreme_ctr_min_impressions: 100,
            zero_engagement_min_impressions: 5_000,
            zero_engagement_min_days: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigThresholds {
    pub low_efficiency: f64,
    pub low_volume: i64,
}

impl Default for ConfigThresholds {
    fn default() -> Self {
        Self {
            low_efficiency: 0.60,
            low_volume: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoThresholds {
    /// Countries with fewer window impressions are left out of the tiers
    pub min_impressions: i64,
    /// CTR below this fraction of the average is underperforming
    pub low_ctr_ratio: f64,
    /// CPM below this fraction of the average is low-value traffic
    pub low_cpm_ratio: f64,
    /// Underperformers above this spend are recommended for exclusion
    pub exclude_min_spend_micros: i64,
    pub expand_ctr_ratio: f64,
}

impl Default for GeoThresholds {
    fn default() -> Self {
        Self {
            min_impressions: 100,
            low_ctr_ratio: 0.5,
            low_cpm_ratio: 0.3,
            exclude_min_spend_micros: 10_000_000,
            expand_ctr_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Accepted date formats, tried in order
    pub date_formats: Vec<String>,
    /// Extra raw header names per logical field, tried before the built-ins
    pub aliases: HashMap<String, Vec<String>>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            date_formats: crate::ingest_core::coerce::DEFAULT_DATE_FORMATS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            aliases: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        env::remove_var("QPSFLOW_DB_PATH");
        env::remove_var("QPSFLOW_SHARD_ROWS");
        env::remove_var("QPSFLOW_THRESHOLDS");

        let config = EngineConfig::from_env();

        assert_eq!(config.db_path, "qpsflow.db");
        assert_eq!(config.shard_rows, 5_000);
        assert_eq!(config.window_days, 7);
        assert!(config.thresholds_path.is_none());
    }

    #[test]
    fn test_partial_thresholds_keep_defaults() {
        let thresholds = Thresholds::from_toml(
            r#"
            [coverage]
            high_volume = 20000
            volume_basis = "daily_average"

            [signals]
            key_dimensions = ["app", "country"]

            [ingest.aliases]
            spend = ["Spend (EUR)"]
            "#,
        )
        .unwrap();

        assert_eq!(thresholds.coverage.high_volume, 20_000);
        assert_eq!(thresholds.coverage.medium_volume, 1_000);
        assert_eq!(thresholds.coverage.volume_basis, VolumeBasis::DailyAverage);
        assert_eq!(
            thresholds.signals.key_dimensions,
            vec![Dimension::App, Dimension::Country]
        );
        assert_eq!(thresholds.signals.high_occurrences, 4);
        assert_eq!(thresholds.configs.low_volume, 100);
        assert_eq!(thresholds.geo.exclude_min_spend_micros, 10_000_000);
        assert_eq!(thresholds.ingest.aliases["spend"], vec!["Spend (EUR)"]);
        assert!(!thresholds.ingest.date_formats.is_empty());
    }

    #[test]
    fn test_malformed_thresholds_rejected() {
        assert!(Thresholds::from_toml("[coverage]\nhigh_volume = \"lots\"").is_err());
    }
}
