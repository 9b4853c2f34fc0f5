//! Configuration file handling.
//!
//! This module handles loading, validating and merging configuration from
//! `.adinsight.toml` files.

use crate::error::{EngineError, EngineResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".adinsight.toml";

/// Tolerance on the sum of the confidence weights.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Detection thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Generator and evaluator limits.
    #[serde(default)]
    pub agents: AgentSettings,

    /// Weights of the adjusted confidence formula.
    #[serde(default)]
    pub confidence_weights: ConfidenceWeights,

    /// Retry policy for the whole pipeline.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dataset cleaning settings.
    #[serde(default)]
    pub data_quality: DataQualityConfig,
}

/// Thresholds, all fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// CTR under which delivery is called weak in the reasoning.
    #[serde(default = "default_low_ctr")]
    pub low_ctr: f64,

    /// Adjusted confidence at which an insight counts as strong.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,

    /// Relative ROAS move worth calling out in the reasoning.
    #[serde(default = "default_roas_change_significant")]
    pub roas_change_significant: f64,

    /// Average relative change under which a trend is stable.
    #[serde(default = "default_trend_stable_threshold")]
    pub trend_stable_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_ctr: default_low_ctr(),
            high_confidence: default_high_confidence(),
            roas_change_significant: default_roas_change_significant(),
            trend_stable_threshold: default_trend_stable_threshold(),
        }
    }
}

fn default_low_ctr() -> f64 {
    0.01
}

fn default_high_confidence() -> f64 {
    0.7
}

fn default_roas_change_significant() -> f64 {
    0.15
}

fn default_trend_stable_threshold() -> f64 {
    0.05
}

/// Limits for the generator and evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on generated hypotheses (the floor of three still wins).
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,

    /// Rows required in each group before a significance test runs.
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_hypotheses: default_max_hypotheses(),
            min_data_points: default_min_data_points(),
        }
    }
}

fn default_max_hypotheses() -> usize {
    5
}

fn default_min_data_points() -> usize {
    10
}

/// `adjusted = w1 * initial + w2 * validation + w3 * segmentation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    #[serde(default = "default_insight_weight")]
    pub insight_confidence: f64,

    #[serde(default = "default_validation_weight")]
    pub validation_strength: f64,

    #[serde(default = "default_segmentation_weight")]
    pub segmentation_evidence: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            insight_confidence: default_insight_weight(),
            validation_strength: default_validation_weight(),
            segmentation_evidence: default_segmentation_weight(),
        }
    }
}

fn default_insight_weight() -> f64 {
    0.4
}

fn default_validation_weight() -> f64 {
    0.4
}

fn default_segmentation_weight() -> f64 {
    0.2
}

impl ConfidenceWeights {
    /// Weighted combination, clamped to `[0, 1]`.
    pub fn combine(&self, initial: f64, validation: f64, segmentation: f64) -> f64 {
        let score = self.insight_confidence * initial
            + self.validation_strength * validation
            + self.segmentation_evidence * segmentation;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn sum(&self) -> f64 {
        self.insight_confidence + self.validation_strength + self.segmentation_evidence
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityConfig {
    /// chrono format string for the `date` column.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
        }
    }
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user passed explicitly override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(max) = args.max_hypotheses {
            self.agents.max_hypotheses = max;
        }

        if args.verbose {
            self.logging.level = "debug".to_string();
        } else if args.quiet {
            self.logging.level = "error".to_string();
        }
    }

    /// Check every value before the pipeline starts.
    pub fn validate(&self) -> EngineResult<()> {
        let t = &self.thresholds;
        for (field, value) in [
            ("thresholds.low_ctr", t.low_ctr),
            ("thresholds.high_confidence", t.high_confidence),
            ("thresholds.roas_change_significant", t.roas_change_significant),
            ("thresholds.trend_stable_threshold", t.trend_stable_threshold),
        ] {
            check_unit_interval(field, value)?;
        }

        if self.agents.max_hypotheses < 1 {
            return Err(EngineError::configuration(
                "agents.max_hypotheses",
                self.agents.max_hypotheses,
                "must be at least 1",
            ));
        }
        if self.agents.min_data_points < 2 {
            return Err(EngineError::configuration(
                "agents.min_data_points",
                self.agents.min_data_points,
                "a significance test needs at least 2 rows per group",
            ));
        }

        let w = &self.confidence_weights;
        for (field, value) in [
            ("confidence_weights.insight_confidence", w.insight_confidence),
            ("confidence_weights.validation_strength", w.validation_strength),
            ("confidence_weights.segmentation_evidence", w.segmentation_evidence),
        ] {
            check_unit_interval(field, value)?;
        }

        let sum = w.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::configuration(
                "confidence_weights",
                format!("sum {:.3}", sum),
                "weights must sum to 1.0",
            ));
        }

        // A rejected hypothesis scores at most w1 and an inconclusive one with
        // thin evidence at most w1 + 0.3 * w2; both must stay under 0.6.
        let thin_ceiling = w.insight_confidence + 0.3 * w.validation_strength;
        if thin_ceiling >= 0.6 {
            return Err(EngineError::configuration(
                "confidence_weights.insight_confidence",
                w.insight_confidence,
                format!(
                    "insight_confidence + 0.3 * validation_strength = {:.3} must stay below 0.6",
                    thin_ceiling
                ),
            ));
        }
        // A confirmed hypothesis with no initial confidence must reach 0.3.
        if w.validation_strength < 0.3 {
            return Err(EngineError::configuration(
                "confidence_weights.validation_strength",
                w.validation_strength,
                "must be at least 0.3",
            ));
        }

        let r = &self.retry;
        if !(r.backoff_multiplier.is_finite() && r.backoff_multiplier >= 1.0) {
            return Err(EngineError::configuration(
                "retry.backoff_multiplier",
                r.backoff_multiplier,
                "must be at least 1.0",
            ));
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

fn check_unit_interval(field: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::configuration(
            field,
            value,
            "must be a finite value in [0, 1]",
        ))
    }
}
