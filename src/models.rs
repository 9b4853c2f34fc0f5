//! Data models for the insight engine.
//!
//! This module contains the hypothesis, evidence and report structures
//! passed between the generator, the evaluator and the ranker. Every type
//! serializes to plain JSON and decodes back to an equal value.

use crate::analysis::{DateRange, Dimension, RatioMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Creative,
    Audience,
    Platform,
    Budget,
    Seasonality,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Creative => write!(f, "creative"),
            Category::Audience => write!(f, "audience"),
            Category::Platform => write!(f, "platform"),
            Category::Budget => write!(f, "budget"),
            Category::Seasonality => write!(f, "seasonality"),
        }
    }
}

/// Direction a trend hypothesis claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendClaim {
    Declined,
    Improved,
}

/// Structured pointer from a hypothesis to the data it talks about.
///
/// Hypotheses that arrive without one are evaluated by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HypothesisTarget {
    /// A ratio metric moved over time.
    Trend { metric: RatioMetric, claim: TrendClaim },
    /// One segment trails the rest of its dimension.
    Segment {
        dimension: Dimension,
        segment: String,
        metric: RatioMetric,
    },
    /// One segment trails another segment of the same dimension.
    SegmentPair {
        dimension: Dimension,
        target: String,
        comparison: String,
        metric: RatioMetric,
    },
}

/// A candidate explanation for a metric change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique within one generation run.
    pub hypothesis_id: String,
    #[serde(rename = "hypothesis_text")]
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub supporting_observations: Vec<String>,
    /// Summary fields the text was derived from.
    #[serde(rename = "evidence_used", default)]
    pub evidence_refs: Vec<String>,
    #[serde(rename = "confidence_score")]
    pub initial_confidence: f64,
    #[serde(default = "default_true")]
    pub testable: bool,
    #[serde(default)]
    pub validation_approach: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<HypothesisTarget>,
}

fn default_true() -> bool {
    true
}

/// Outcome of validating a hypothesis against the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Confirmed,
    Rejected,
    Inconclusive,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Confirmed => write!(f, "Confirmed"),
            ValidationStatus::Rejected => write!(f, "Rejected"),
            ValidationStatus::Inconclusive => write!(f, "Inconclusive"),
        }
    }
}

impl ValidationStatus {
    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            ValidationStatus::Confirmed => "✅",
            ValidationStatus::Rejected => "❌",
            ValidationStatus::Inconclusive => "❔",
        }
    }
}

/// A named number backing (or contextualising) a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMetric {
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub comparison: String,
    /// Filler added to reach two metrics; not corroborating evidence.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EvidenceMetric {
    pub fn new(name: impl Into<String>, value: f64, comparison: impl Into<String>) -> Self {
        Self {
            metric_name: name.into(),
            value: finite_or_zero(value),
            comparison: comparison.into(),
            synthetic: false,
        }
    }

    pub fn synthetic(name: impl Into<String>, value: f64, comparison: impl Into<String>) -> Self {
        Self {
            synthetic: true,
            ..Self::new(name, value, comparison)
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Which significance test produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceTest {
    TwoProportionZ,
    WelchT,
}

impl fmt::Display for SignificanceTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignificanceTest::TwoProportionZ => write!(f, "two-proportion z-test"),
            SignificanceTest::WelchT => write!(f, "Welch t-test"),
        }
    }
}

/// Result of a significance test between the target and comparison groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSignificance {
    pub test: SignificanceTest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    /// 95% interval on `target - comparison`, `low <= high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<[f64; 2]>,
    pub target_sample: f64,
    pub comparison_sample: f64,
}

/// Evidence gathered for one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub metrics: Vec<EvidenceMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistical_significance: Option<StatisticalSignificance>,
}

impl Evidence {
    /// Number of metrics that are not filler.
    pub fn genuine_metric_count(&self) -> usize {
        self.metrics.iter().filter(|m| !m.synthetic).count()
    }
}

/// A hypothesis after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedHypothesis {
    #[serde(flatten)]
    pub hypothesis: Hypothesis,
    pub validation_status: ValidationStatus,
    pub evidence: Evidence,
    #[serde(rename = "adjusted_confidence_score")]
    pub adjusted_confidence: f64,
    pub validation_reasoning: String,
}

/// Short projection of a ranked hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedInsight {
    #[serde(rename = "hypothesis")]
    pub hypothesis_text: String,
    pub validated_confidence: f64,
}

impl From<&ValidatedHypothesis> for RankedInsight {
    fn from(validated: &ValidatedHypothesis) -> Self {
        Self {
            hypothesis_text: validated.hypothesis.text.clone(),
            validated_confidence: validated.adjusted_confidence,
        }
    }
}

/// Think / analyze / conclude narrative attached to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub think: String,
    pub analyze: String,
    pub conclude: String,
}

/// Counts of validation outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub inconclusive: usize,
    /// Hypotheses grouped by category.
    pub by_category: BTreeMap<String, usize>,
}

impl StatusSummary {
    /// Creates a summary from a list of validated hypotheses.
    pub fn from_validated(validated: &[ValidatedHypothesis]) -> Self {
        let mut summary = Self {
            total: validated.len(),
            ..Self::default()
        };

        for v in validated {
            match v.validation_status {
                ValidationStatus::Confirmed => summary.confirmed += 1,
                ValidationStatus::Rejected => summary.rejected += 1,
                ValidationStatus::Inconclusive => summary.inconclusive += 1,
            }

            *summary
                .by_category
                .entry(v.hypothesis.category.to_string())
                .or_insert(0) += 1;
        }

        summary
    }
}

/// Output of one pipeline run. Contains no timestamps, so identical
/// inputs produce identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub focus_metric: String,
    /// Generated hypotheses in generation order.
    pub hypotheses: Vec<Hypothesis>,
    /// Validated hypotheses ranked by adjusted confidence.
    pub validated_hypotheses: Vec<ValidatedHypothesis>,
    pub top_insights: Vec<RankedInsight>,
    pub summary: StatusSummary,
    pub reasoning: Reasoning,
}

/// Metadata about the run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub dataset_path: String,
    pub rows_analyzed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Window the query restricted the rows to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    pub tool_version: String,
}

/// The complete document written to `insights.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub insights: InsightsReport,
}
