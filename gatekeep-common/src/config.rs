//! Configuration loading
//!
//! Bootstrap configuration lives in a TOML file. Every field has a built-in
//! default, so a missing file is not an error: the service starts with defaults
//! and logs a warning.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `GATEKEEP_CONFIG` environment variable
//! 3. `<platform config dir>/gatekeep/gatekeep.toml`

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "GATEKEEP_CONFIG";

/// Upper bound on `scheduler.lookback_hours` (ten years)
pub const MAX_LOOKBACK_HOURS: i64 = 87_600;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file (defaults to the platform data dir)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP control surface port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            clustering: ClusteringConfig::default(),
            merge: MergeConfig::default(),
            promotion: PromotionConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    5790
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Reconciliation scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the periodic timer (manual triggers work either way)
    pub enabled: bool,
    /// Seconds between timer-driven cycles
    pub interval_secs: u64,
    /// Cycle reports kept for the status API
    pub history_size: usize,
    /// Event ids to reconcile; empty means every event known to the store
    pub event_ids: Vec<String>,
    /// Buffered status events per subscriber
    pub event_bus_capacity: usize,
    /// How far back (hours) check-ins are fetched each cycle
    pub lookback_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            history_size: 50,
            event_ids: Vec::new(),
            event_bus_capacity: 256,
            lookback_hours: 168,
        }
    }
}

/// Proximity clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Single-link radius: gates this close (meters) are duplicate candidates
    pub radius_m: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self { radius_m: 50.0 }
    }
}

/// Duplicate resolution cutoffs on a cluster's highest member confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Strictly above this: merge automatically
    pub auto_merge_above: f64,
    /// At or above this (up to `auto_merge_above`): flag for manual review
    pub review_at_or_above: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_merge_above: 0.80,
            review_at_or_above: 0.60,
        }
    }
}

/// Promotion ladder thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub probation_min_samples: u32,
    pub probation_min_confidence: f64,
    pub enforced_min_samples: u32,
    pub enforced_min_confidence: f64,
    /// High-volume shortcut straight to enforced
    pub high_volume_min_samples: u32,
    pub high_volume_min_confidence: f64,
    /// Non-enforced gates with fewer samples than this are removed once stale
    pub removal_below_samples: u32,
    /// Gate age (hours since creation) after which low-evidence gates are removed
    pub removal_age_hours: i64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            probation_min_samples: 5,
            probation_min_confidence: 0.60,
            enforced_min_samples: 15,
            enforced_min_confidence: 0.75,
            high_volume_min_samples: 30,
            high_volume_min_confidence: 0.65,
            removal_below_samples: 5,
            removal_age_hours: 24,
        }
    }
}

/// Confidence model weights and curve scales
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub sample_weight: f64,
    pub accuracy_weight: f64,
    pub consistency_weight: f64,
    /// Sample count at which the sample factor reaches ~63%
    pub sample_scale: f64,
    /// Accuracy radius (meters) at which the accuracy factor halves
    pub accuracy_scale_m: f64,
    /// Spread (meters) at which the consistency factor halves
    pub spread_scale_m: f64,
    /// Assumed accuracy radius when scanners report none
    pub default_accuracy_m: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            sample_weight: 0.5,
            accuracy_weight: 0.25,
            consistency_weight: 0.25,
            sample_scale: 10.0,
            accuracy_scale_m: 25.0,
            spread_scale_m: 15.0,
            default_accuracy_m: 50.0,
        }
    }
}

impl TomlConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        // NaN slips through every ordered comparison below
        for (name, value) in [
            ("scoring.sample_weight", s.sample_weight),
            ("scoring.accuracy_weight", s.accuracy_weight),
            ("scoring.consistency_weight", s.consistency_weight),
            ("scoring.sample_scale", s.sample_scale),
            ("scoring.accuracy_scale_m", s.accuracy_scale_m),
            ("scoring.spread_scale_m", s.spread_scale_m),
            ("scoring.default_accuracy_m", s.default_accuracy_m),
            ("merge.auto_merge_above", self.merge.auto_merge_above),
            ("merge.review_at_or_above", self.merge.review_at_or_above),
            ("promotion.probation_min_confidence", self.promotion.probation_min_confidence),
            ("promotion.enforced_min_confidence", self.promotion.enforced_min_confidence),
            ("promotion.high_volume_min_confidence", self.promotion.high_volume_min_confidence),
            ("clustering.radius_m", self.clustering.radius_m),
        ] {
            if !value.is_finite() {
                return Err(Error::Config(format!("{} must be a finite number (got {})", name, value)));
            }
        }

        let weight_sum = s.sample_weight + s.accuracy_weight + s.consistency_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "scoring weights must sum to 1.0 (got {:.4})",
                weight_sum
            )));
        }
        for (name, weight) in [
            ("sample_weight", s.sample_weight),
            ("accuracy_weight", s.accuracy_weight),
            ("consistency_weight", s.consistency_weight),
        ] {
            if weight < 0.0 {
                return Err(Error::Config(format!("scoring.{} must not be negative", name)));
            }
        }
        for (name, scale) in [
            ("sample_scale", s.sample_scale),
            ("accuracy_scale_m", s.accuracy_scale_m),
            ("spread_scale_m", s.spread_scale_m),
            ("default_accuracy_m", s.default_accuracy_m),
        ] {
            if scale <= 0.0 {
                return Err(Error::Config(format!("scoring.{} must be positive", name)));
            }
        }

        let m = &self.merge;
        for (name, value) in [
            ("merge.auto_merge_above", m.auto_merge_above),
            ("merge.review_at_or_above", m.review_at_or_above),
            ("promotion.probation_min_confidence", self.promotion.probation_min_confidence),
            ("promotion.enforced_min_confidence", self.promotion.enforced_min_confidence),
            ("promotion.high_volume_min_confidence", self.promotion.high_volume_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1] (got {})", name, value)));
            }
        }
        if m.review_at_or_above > m.auto_merge_above {
            return Err(Error::Config(
                "merge.review_at_or_above must not exceed merge.auto_merge_above".to_string(),
            ));
        }

        if self.clustering.radius_m <= 0.0 {
            return Err(Error::Config("clustering.radius_m must be positive".to_string()));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(Error::Config("scheduler.interval_secs must be positive".to_string()));
        }
        if self.scheduler.lookback_hours <= 0 {
            return Err(Error::Config("scheduler.lookback_hours must be positive".to_string()));
        }
        if self.scheduler.lookback_hours > MAX_LOOKBACK_HOURS {
            return Err(Error::Config(format!(
                "scheduler.lookback_hours must not exceed {}",
                MAX_LOOKBACK_HOURS
            )));
        }
        if self.scheduler.event_bus_capacity == 0 {
            return Err(Error::Config("scheduler.event_bus_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Database path from config, or the platform default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Pick the config file to load, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("gatekeep").join("gatekeep.toml"))
}

/// Load the TOML config, falling back to defaults when the file is missing
///
/// A file that exists but fails to parse or validate is an error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let config = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        Some(path) => {
            warn!("Config file {} not found, using built-in defaults", path.display());
            TomlConfig::default()
        }
        None => {
            warn!("No config file location available, using built-in defaults");
            TomlConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gatekeep"))
        .unwrap_or_else(|| PathBuf::from("./gatekeep_data"))
        .join("gatekeep.db")
}
