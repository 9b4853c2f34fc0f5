//! Hypothesis validation.
//!
//! Every hypothesis is turned into a claim about two groups of rows: the
//! target group should be lower (or higher) than the comparison group on a
//! ratio metric. The evaluator measures both groups, runs a significance
//! test when both are large enough, checks whether the other segmentation
//! dimensions agree, and folds the result into an adjusted confidence.
//!
//! Nothing in here fails: missing data ends up as an `inconclusive` status
//! with low confidence.

use crate::analysis::stats::{approx_eq, safe_ratio, two_proportion_test, welch_t_test};
use crate::analysis::{Dimension, MetricSummary, RatioMetric, Segment, Totals};
use crate::config::Config;
use crate::dataset::{AdRow, Dataset};
use crate::models::{
    Category, Evidence, EvidenceMetric, Hypothesis, HypothesisTarget, StatisticalSignificance,
    TrendClaim, ValidatedHypothesis, ValidationStatus,
};
use chrono::Duration;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// p-values below this confirm a hypothesis.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Length of each trend comparison window.
const TREND_WINDOW_DAYS: i64 = 7;

/// Validate hypotheses against the dataset, one output per input, in order.
pub fn validate(
    hypotheses: &[Hypothesis],
    dataset: &Dataset,
    summary: &MetricSummary,
    config: &Config,
) -> Vec<ValidatedHypothesis> {
    Evaluator::new(dataset, summary, config).validate(hypotheses)
}

/// Which way the target group is claimed to sit relative to the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Lower,
    Higher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionCheck {
    Holds,
    Contradicted,
    Flat,
}

/// Two row groups and the claimed relation between them.
struct Claim<'a> {
    metric: RatioMetric,
    expected: Expected,
    target: Vec<&'a AdRow>,
    comparison: Vec<&'a AdRow>,
    target_label: String,
    comparison_label: String,
    /// Prefixes for evidence metric names.
    names: (&'static str, &'static str),
    /// Dimension the claim is about, skipped for corroboration.
    dimension: Option<Dimension>,
}

/// Measurements of a claim.
enum EvidenceOutcome {
    /// Both groups have a usable ratio.
    Compared {
        target_ratio: f64,
        comparison_ratio: f64,
        direction: DirectionCheck,
    },
    /// At least one group is empty or has a zero denominator.
    Insufficient { reason: String },
}

pub struct Evaluator<'a> {
    dataset: &'a Dataset,
    summary: &'a MetricSummary,
    config: &'a Config,
}

impl<'a> Evaluator<'a> {
    pub fn new(dataset: &'a Dataset, summary: &'a MetricSummary, config: &'a Config) -> Self {
        Self {
            dataset,
            summary,
            config,
        }
    }

    pub fn validate(&self, hypotheses: &[Hypothesis]) -> Vec<ValidatedHypothesis> {
        let validated: Vec<ValidatedHypothesis> =
            hypotheses.iter().map(|h| self.evaluate(h)).collect();

        let confirmed = validated
            .iter()
            .filter(|v| v.validation_status == ValidationStatus::Confirmed)
            .count();
        info!(
            "Validated {} hypotheses ({} confirmed)",
            validated.len(),
            confirmed
        );

        validated
    }

    /// Validate a single hypothesis.
    pub fn evaluate(&self, hypothesis: &Hypothesis) -> ValidatedHypothesis {
        let initial = unit_or_zero(hypothesis.initial_confidence);

        let target = hypothesis
            .target
            .clone()
            .or_else(|| self.fallback_target(hypothesis.category));

        let Some(target) = target else {
            let mut metrics = Vec::new();
            self.pad_metrics(&mut metrics, "segment", 0);
            return self.finish(
                hypothesis,
                ValidationStatus::Inconclusive,
                Evidence {
                    metrics,
                    statistical_significance: None,
                },
                (initial, 0.3, 0.0),
                format!(
                    "No {} data available to test this hypothesis; evidence is limited to sample size",
                    hypothesis.category
                ),
            );
        };

        let claim = self.resolve_claim(&target);
        let target_totals = Totals::from_rows(claim.target.iter().copied());
        let comparison_totals = Totals::from_rows(claim.comparison.iter().copied());
        let metric = claim.metric;

        let mut metrics = Vec::new();
        let target_ratio = target_totals
            .has_denominator(metric)
            .then(|| target_totals.ratio(metric));
        // Without a target group the comparison alone says nothing.
        let comparison_ratio = (!claim.target.is_empty() && comparison_totals.has_denominator(metric))
            .then(|| comparison_totals.ratio(metric));

        if let Some(value) = target_ratio {
            metrics.push(EvidenceMetric::new(
                format!("{}_{}", claim.names.0, metric.key()),
                value,
                format!(
                    "{} {}: {} over {} rows",
                    claim.target_label,
                    metric,
                    metric.format(value),
                    target_totals.rows
                ),
            ));
        }
        if let Some(value) = comparison_ratio {
            metrics.push(EvidenceMetric::new(
                format!("{}_{}", claim.names.1, metric.key()),
                value,
                format!(
                    "{} {}: {} over {} rows",
                    claim.comparison_label,
                    metric,
                    metric.format(value),
                    comparison_totals.rows
                ),
            ));
        }

        let outcome = match (target_ratio, comparison_ratio) {
            (Some(t), Some(c)) => {
                let gap = safe_ratio(t - c, c.max(metric.baseline_floor())) * 100.0;
                metrics.push(EvidenceMetric::new(
                    "relative_gap_pct",
                    gap,
                    format!(
                        "{} vs {}: {:+.1}% {}",
                        claim.target_label, claim.comparison_label, gap, metric
                    ),
                ));
                EvidenceOutcome::Compared {
                    target_ratio: t,
                    comparison_ratio: c,
                    direction: check_direction(t, c, claim.expected),
                }
            }
            (None, _) if claim.target.is_empty() => EvidenceOutcome::Insufficient {
                reason: format!("No rows found for {}", claim.target_label),
            },
            (None, _) => EvidenceOutcome::Insufficient {
                reason: format!("{} has no {} denominator", claim.target_label, metric),
            },
            (Some(_), None) => EvidenceOutcome::Insufficient {
                reason: format!("No comparable rows for {}", claim.comparison_label),
            },
        };

        self.pad_metrics(&mut metrics, claim.names.0, target_totals.rows);

        let significance = match outcome {
            EvidenceOutcome::Compared { .. } => self.significance(&claim, &target_totals, &comparison_totals),
            EvidenceOutcome::Insufficient { .. } => None,
        };

        let (status, validation_strength, segmentation_strength, reasoning) = match &outcome {
            EvidenceOutcome::Insufficient { reason } => (
                ValidationStatus::Inconclusive,
                0.3,
                0.0,
                format!("{}; marked inconclusive", reason),
            ),
            EvidenceOutcome::Compared {
                target_ratio,
                comparison_ratio,
                direction,
            } => {
                let observed = format!(
                    "{} {} {} vs {} {}",
                    claim.target_label,
                    metric,
                    metric.format(*target_ratio),
                    claim.comparison_label,
                    metric.format(*comparison_ratio)
                );
                let p_value = significance.as_ref().and_then(|s| s.p_value);

                match direction {
                    DirectionCheck::Contradicted => (
                        ValidationStatus::Rejected,
                        0.0,
                        0.0,
                        format!("{} contradicts the claimed direction", observed),
                    ),
                    DirectionCheck::Flat => (
                        ValidationStatus::Inconclusive,
                        0.3,
                        0.0,
                        format!("{} shows no measurable difference", observed),
                    ),
                    DirectionCheck::Holds => {
                        let corroborating = self.corroborating_dimensions(&claim);
                        let segmentation = match corroborating {
                            0 => 0.0,
                            1 => 0.5,
                            _ => 1.0,
                        };
                        let agreement = format!(
                            "direction holds in {} other dimension{}",
                            corroborating,
                            if corroborating == 1 { "" } else { "s" }
                        );

                        match (p_value, &significance) {
                            (Some(p), Some(sig)) if p < SIGNIFICANCE_LEVEL => (
                                ValidationStatus::Confirmed,
                                1.0,
                                segmentation,
                                format!(
                                    "{} supports the claim; {} p = {:.4}; {}",
                                    observed, sig.test, p, agreement
                                ),
                            ),
                            (Some(p), Some(sig)) => (
                                ValidationStatus::Inconclusive,
                                0.5,
                                segmentation,
                                format!(
                                    "{} points the claimed way but is not significant ({} p = {:.4}); {}",
                                    observed, sig.test, p, agreement
                                ),
                            ),
                            _ => (
                                ValidationStatus::Inconclusive,
                                0.5,
                                segmentation,
                                format!(
                                    "{} points the claimed way but significance could not be tested (needs {} rows per group); {}",
                                    observed, self.config.agents.min_data_points, agreement
                                ),
                            ),
                        }
                    }
                }
            }
        };

        self.finish(
            hypothesis,
            status,
            Evidence {
                metrics,
                statistical_significance: significance,
            },
            (initial, validation_strength, segmentation_strength),
            reasoning,
        )
    }

    fn finish(
        &self,
        hypothesis: &Hypothesis,
        status: ValidationStatus,
        evidence: Evidence,
        (initial, validation, segmentation): (f64, f64, f64),
        reasoning: String,
    ) -> ValidatedHypothesis {
        let adjusted = self
            .config
            .confidence_weights
            .combine(initial, validation, segmentation);

        debug!(
            "{} -> {} (adjusted confidence {:.3})",
            hypothesis.hypothesis_id, status, adjusted
        );

        ValidatedHypothesis {
            hypothesis: hypothesis.clone(),
            validation_status: status,
            evidence,
            adjusted_confidence: adjusted,
            validation_reasoning: reasoning,
        }
    }

    /// Best-effort target for hypotheses that arrive without one.
    fn fallback_target(&self, category: Category) -> Option<HypothesisTarget> {
        let trend_claim = |metric: RatioMetric| {
            let claim = match self.summary.trends.get(metric) {
                Some(trend) if trend.net_change() > 0.0 => TrendClaim::Improved,
                _ => TrendClaim::Declined,
            };
            HypothesisTarget::Trend { metric, claim }
        };

        match category {
            Category::Seasonality | Category::Budget => Some(trend_claim(RatioMetric::Roas)),
            Category::Creative => Some(trend_claim(RatioMetric::Ctr)),
            Category::Audience => {
                let worst = lowest(self.summary.segmentation.get(Dimension::AudienceType))?;
                Some(HypothesisTarget::Segment {
                    dimension: Dimension::AudienceType,
                    segment: worst.name.clone(),
                    metric: RatioMetric::Roas,
                })
            }
            Category::Platform => {
                let platforms = self.summary.segmentation.get(Dimension::Platform);
                let worst = lowest(platforms)?;
                let best = platforms
                    .iter()
                    .rev()
                    .max_by(|a, b| a.roas.total_cmp(&b.roas))?;
                if best.name == worst.name {
                    return None;
                }
                Some(HypothesisTarget::SegmentPair {
                    dimension: Dimension::Platform,
                    target: worst.name.clone(),
                    comparison: best.name.clone(),
                    metric: RatioMetric::Roas,
                })
            }
        }
    }

    fn resolve_claim(&self, target: &HypothesisTarget) -> Claim<'a> {
        let rows = &self.dataset.rows;

        match target {
            HypothesisTarget::Segment {
                dimension,
                segment,
                metric,
            } => {
                let (target, comparison): (Vec<&AdRow>, Vec<&AdRow>) = rows
                    .iter()
                    .filter(|r| r.dimension_value(*dimension).is_some())
                    .partition(|r| r.dimension_value(*dimension) == Some(segment.as_str()));
                Claim {
                    metric: *metric,
                    expected: Expected::Lower,
                    target,
                    comparison,
                    target_label: format!("'{}'", segment),
                    comparison_label: format!("other {}s", dimension.label()),
                    names: ("segment", "rest"),
                    dimension: Some(*dimension),
                }
            }
            HypothesisTarget::SegmentPair {
                dimension,
                target,
                comparison,
                metric,
            } => Claim {
                metric: *metric,
                expected: Expected::Lower,
                target: rows
                    .iter()
                    .filter(|r| r.dimension_value(*dimension) == Some(target.as_str()))
                    .collect(),
                comparison: rows
                    .iter()
                    .filter(|r| r.dimension_value(*dimension) == Some(comparison.as_str()))
                    .collect(),
                target_label: format!("'{}'", target),
                comparison_label: format!("'{}'", comparison),
                names: ("segment", "comparison"),
                dimension: Some(*dimension),
            },
            HypothesisTarget::Trend { metric, claim } => {
                let (target, comparison) = match rows.iter().map(|r| r.date).max() {
                    Some(latest) => {
                        let recent_start = latest - Duration::days(TREND_WINDOW_DAYS);
                        let previous_start = recent_start - Duration::days(TREND_WINDOW_DAYS);
                        (
                            rows.iter().filter(|r| r.date > recent_start).collect(),
                            rows.iter()
                                .filter(|r| r.date > previous_start && r.date <= recent_start)
                                .collect(),
                        )
                    }
                    None => (Vec::new(), Vec::new()),
                };
                Claim {
                    metric: *metric,
                    expected: match claim {
                        TrendClaim::Declined => Expected::Lower,
                        TrendClaim::Improved => Expected::Higher,
                    },
                    target,
                    comparison,
                    target_label: "last 7 days".to_string(),
                    comparison_label: "prior 7 days".to_string(),
                    names: ("recent", "previous"),
                    dimension: None,
                }
            }
        }
    }

    /// Test the claim when both groups meet the minimum sample size.
    fn significance(
        &self,
        claim: &Claim<'_>,
        target: &Totals,
        comparison: &Totals,
    ) -> Option<StatisticalSignificance> {
        let min = self.config.agents.min_data_points;
        if claim.target.len() < min || claim.comparison.len() < min {
            debug!(
                "Skipping significance test: {} vs {} rows, need {}",
                claim.target.len(),
                claim.comparison.len(),
                min
            );
            return None;
        }

        match claim.metric {
            RatioMetric::Roas => {
                let a = row_roas(&claim.target);
                let b = row_roas(&claim.comparison);
                if a.len() < min || b.len() < min {
                    return None;
                }
                welch_t_test(&a, &b)
            }
            RatioMetric::Ctr => two_proportion_test(
                target.clicks,
                target.impressions,
                comparison.clicks,
                comparison.impressions,
            ),
        }
    }

    /// Number of other dimensions in which the claimed direction holds in
    /// most of the cells where both groups have data.
    fn corroborating_dimensions(&self, claim: &Claim<'_>) -> usize {
        Dimension::ALL
            .into_iter()
            .filter(|d| Some(*d) != claim.dimension)
            .filter(|d| dimension_corroborates(claim, *d))
            .count()
    }

    /// Top up to two metrics with clearly labelled sample sizes.
    fn pad_metrics(&self, metrics: &mut Vec<EvidenceMetric>, prefix: &str, target_rows: usize) {
        let fillers = [
            EvidenceMetric::synthetic(
                format!("{}_row_count", prefix),
                target_rows as f64,
                format!("sample size: {} matching rows", target_rows),
            ),
            EvidenceMetric::synthetic(
                "dataset_row_count",
                self.dataset.rows.len() as f64,
                format!("sample size: {} rows in dataset", self.dataset.rows.len()),
            ),
        ];

        for filler in fillers {
            if metrics.len() >= 2 {
                break;
            }
            if metrics.iter().all(|m| m.metric_name != filler.metric_name) {
                metrics.push(filler);
            }
        }
    }
}

fn dimension_corroborates(claim: &Claim<'_>, dimension: Dimension) -> bool {
    let mut cells: BTreeMap<&str, (Totals, Totals)> = BTreeMap::new();
    for row in &claim.target {
        if let Some(value) = row.dimension_value(dimension) {
            cells.entry(value).or_default().0.add(row);
        }
    }
    for row in &claim.comparison {
        if let Some(value) = row.dimension_value(dimension) {
            cells.entry(value).or_default().1.add(row);
        }
    }

    let metric = claim.metric;
    let comparable: Vec<DirectionCheck> = cells
        .values()
        .filter(|(t, c)| t.has_denominator(metric) && c.has_denominator(metric))
        .map(|(t, c)| check_direction(t.ratio(metric), c.ratio(metric), claim.expected))
        .collect();

    let holds = comparable
        .iter()
        .filter(|d| **d == DirectionCheck::Holds)
        .count();
    !comparable.is_empty() && holds * 2 > comparable.len()
}

fn check_direction(target: f64, comparison: f64, expected: Expected) -> DirectionCheck {
    if approx_eq(target, comparison) {
        return DirectionCheck::Flat;
    }
    let lower = target < comparison;
    match (expected, lower) {
        (Expected::Lower, true) | (Expected::Higher, false) => DirectionCheck::Holds,
        _ => DirectionCheck::Contradicted,
    }
}

/// Per-row ROAS for rows with spend.
fn row_roas(rows: &[&AdRow]) -> Vec<f64> {
    rows.iter()
        .filter(|r| r.spend > 0.0)
        .map(|r| r.revenue / r.spend)
        .filter(|v| v.is_finite())
        .collect()
}

/// Lowest-ROAS segment; ties keep the earliest.
fn lowest(segments: &[Segment]) -> Option<&Segment> {
    segments.iter().min_by(|a, b| a.roas.total_cmp(&b.roas))
}

fn unit_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::generator::generate;
    use crate::analysis::build_summary;
    use crate::dataset::tests::row;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn hypothesis(id: &str, category: Category, confidence: f64, target: Option<HypothesisTarget>) -> Hypothesis {
        Hypothesis {
            hypothesis_id: id.to_string(),
            text: format!("hypothesis {}", id),
            category,
            supporting_observations: Vec::new(),
            evidence_refs: Vec::new(),
            initial_confidence: confidence,
            testable: true,
            validation_approach: "compare groups".to_string(),
            target,
        }
    }

    /// Twelve rows per platform: TikTok near ROAS 1, Meta near ROAS 3.
    fn platform_dataset() -> Dataset {
        let mut rows = Vec::new();
        for i in 0..12 {
            let day = format!("2024-03-{:02}", i + 1);
            let creative = if i % 2 == 0 { "Video" } else { "Image" };
            for (platform, base) in [("TikTok", 90.0), ("Meta", 290.0)] {
                let mut r = row("Spring", &day, 100.0, 1000.0, 20.0, base + (i % 5) as f64 * 5.0);
                r.platform = Some(platform.to_string());
                r.creative_type = Some(creative.to_string());
                rows.push(r);
            }
        }
        Dataset {
            rows,
            quality_issues: Vec::new(),
        }
    }

    fn assert_invariants(v: &ValidatedHypothesis) {
        assert!(v.evidence.metrics.len() >= 2);
        let names: HashSet<&str> = v.evidence.metrics.iter().map(|m| m.metric_name.as_str()).collect();
        assert_eq!(names.len(), v.evidence.metrics.len());
        assert!((0.0..=1.0).contains(&v.adjusted_confidence));
        assert!(!v.validation_reasoning.is_empty());
        if v.validation_status == ValidationStatus::Rejected || v.evidence.genuine_metric_count() < 2 {
            assert!(v.adjusted_confidence < 0.6);
        }
    }

    #[test]
    fn test_platform_gap_is_confirmed() {
        let dataset = platform_dataset();
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let hypotheses = generate(&summary, "roas", &config);
        let platform = hypotheses
            .iter()
            .find(|h| h.category == Category::Platform)
            .expect("platform hypothesis");
        assert_abs_diff_eq!(platform.initial_confidence, 0.8);

        let validated = validate(&hypotheses, &dataset, &summary, &config);
        assert_eq!(validated.len(), hypotheses.len());
        let v = validated
            .iter()
            .find(|v| v.hypothesis.hypothesis_id == platform.hypothesis_id)
            .unwrap();

        assert_eq!(v.validation_status, ValidationStatus::Confirmed);
        let sig = v.evidence.statistical_significance.as_ref().unwrap();
        assert!(sig.p_value.unwrap() < SIGNIFICANCE_LEVEL);
        let [low, high] = sig.confidence_interval.unwrap();
        assert!(low <= high);
        // Campaign and creative type both corroborate: 0.4*0.8 + 0.4 + 0.2.
        assert_abs_diff_eq!(v.adjusted_confidence, 0.92, epsilon = 1e-9);
        assert!(v.adjusted_confidence >= 0.3);
        assert_invariants(v);
    }

    #[test]
    fn test_small_samples_skip_significance() {
        let dataset = platform_dataset();
        let mut config = Config::default();
        config.agents.min_data_points = 50;
        let summary = build_summary(&dataset, &config);
        let h = hypothesis(
            "p",
            Category::Platform,
            0.8,
            Some(HypothesisTarget::SegmentPair {
                dimension: Dimension::Platform,
                target: "TikTok".to_string(),
                comparison: "Meta".to_string(),
                metric: RatioMetric::Roas,
            }),
        );
        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Inconclusive);
        assert!(v.evidence.statistical_significance.is_none());
        assert!(v.validation_reasoning.contains("50 rows per group"));
        assert_invariants(&v);
    }

    #[test]
    fn test_missing_segment_is_inconclusive() {
        let dataset = platform_dataset();
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let h = hypothesis(
            "x",
            Category::Budget,
            0.7,
            Some(HypothesisTarget::Segment {
                dimension: Dimension::Campaign,
                segment: "X".to_string(),
                metric: RatioMetric::Roas,
            }),
        );

        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Inconclusive);
        assert_eq!(v.evidence.metrics.len(), 2);
        assert!(v.evidence.metrics.iter().all(|m| m.synthetic));
        assert_eq!(v.evidence.metrics[0].metric_name, "segment_row_count");
        assert_eq!(v.evidence.metrics[0].value, 0.0);
        assert!(v.evidence.metrics[1].comparison.contains("sample size"));
        assert!(v.evidence.statistical_significance.is_none());
        assert_abs_diff_eq!(v.adjusted_confidence, 0.4 * 0.7 + 0.4 * 0.3, epsilon = 1e-9);
        assert!(v.adjusted_confidence < 0.6);
        assert_invariants(&v);
    }

    #[test]
    fn test_segment_without_comparison_group_is_inconclusive() {
        // Every row belongs to campaign "Spring", so nothing is left to compare.
        let dataset = platform_dataset();
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let h = hypothesis(
            "only",
            Category::Budget,
            0.7,
            Some(HypothesisTarget::Segment {
                dimension: Dimension::Campaign,
                segment: "Spring".to_string(),
                metric: RatioMetric::Roas,
            }),
        );

        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Inconclusive);
        assert_eq!(v.evidence.genuine_metric_count(), 1);
        assert_eq!(v.evidence.metrics.len(), 2);
        assert_eq!(v.evidence.metrics[0].metric_name, "segment_roas");
        let filler = &v.evidence.metrics[1];
        assert!(filler.synthetic);
        assert_eq!(filler.metric_name, "segment_row_count");
        assert_eq!(filler.value, 24.0);
        assert!(filler.comparison.contains("sample size"));
        assert!(v.evidence.statistical_significance.is_none());
        assert!(v.validation_reasoning.contains("No comparable rows"));
        assert_abs_diff_eq!(v.adjusted_confidence, 0.4 * 0.7 + 0.4 * 0.3, epsilon = 1e-9);
        assert!(v.adjusted_confidence < 0.6);
        assert_invariants(&v);
    }

    #[test]
    fn test_contradicted_claim_is_rejected() {
        let dataset = platform_dataset();
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let h = hypothesis(
            "r",
            Category::Platform,
            0.8,
            Some(HypothesisTarget::SegmentPair {
                dimension: Dimension::Platform,
                target: "Meta".to_string(),
                comparison: "TikTok".to_string(),
                metric: RatioMetric::Roas,
            }),
        );
        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Rejected);
        assert_abs_diff_eq!(v.adjusted_confidence, 0.32, epsilon = 1e-9);
        assert_invariants(&v);
    }

    #[test]
    fn test_declining_ctr_trend() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rows: Vec<AdRow> = (0..28)
            .map(|i| {
                let date = start + Duration::days(i / 2);
                // Days 0..6 at 3% CTR, days 7..13 at 1.5%.
                let clicks = if i / 2 < 7 { 300.0 } else { 150.0 };
                let mut r = row("Spring", "2024-05-01", 100.0, 10_000.0, clicks, 200.0);
                r.date = date;
                r
            })
            .collect();
        let dataset = Dataset {
            rows,
            quality_issues: Vec::new(),
        };
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let h = hypothesis(
            "t",
            Category::Creative,
            0.6,
            Some(HypothesisTarget::Trend {
                metric: RatioMetric::Ctr,
                claim: TrendClaim::Declined,
            }),
        );

        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Confirmed);
        let sig = v.evidence.statistical_significance.as_ref().unwrap();
        assert_eq!(sig.test, crate::models::SignificanceTest::TwoProportionZ);
        assert_eq!(v.evidence.metrics[0].metric_name, "recent_ctr");
        assert_abs_diff_eq!(v.evidence.metrics[0].value, 0.015, epsilon = 1e-12);
        assert_abs_diff_eq!(v.evidence.metrics[1].value, 0.03, epsilon = 1e-12);
        assert_invariants(&v);
    }

    #[test]
    fn test_untargeted_hypotheses_fall_back_by_category() {
        let dataset = platform_dataset();
        let config = Config::default();
        let summary = build_summary(&dataset, &config);
        let hypotheses = vec![
            hypothesis("a", Category::Seasonality, 0.4, None),
            hypothesis("b", Category::Creative, 0.35, None),
            hypothesis("c", Category::Audience, 0.3, None),
            hypothesis("d", Category::Platform, 0.5, None),
        ];

        let validated = validate(&hypotheses, &dataset, &summary, &config);
        let ids: Vec<&str> = validated.iter().map(|v| v.hypothesis.hypothesis_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        // No audience column in the data, so nothing to test against.
        assert_eq!(validated[2].validation_status, ValidationStatus::Inconclusive);
        assert!(validated[2].evidence.metrics.iter().all(|m| m.synthetic));
        // Platform falls back to the worst/best pair from the summary.
        assert_eq!(validated[3].validation_status, ValidationStatus::Confirmed);
        validated.iter().for_each(assert_invariants);
    }

    #[test]
    fn test_empty_dataset_never_panics() {
        let dataset = Dataset::default();
        let summary = MetricSummary::default();
        let config = Config::default();
        let h = hypothesis(
            "e",
            Category::Seasonality,
            f64::NAN,
            Some(HypothesisTarget::Trend {
                metric: RatioMetric::Roas,
                claim: TrendClaim::Declined,
            }),
        );
        let v = Evaluator::new(&dataset, &summary, &config).evaluate(&h);
        assert_eq!(v.validation_status, ValidationStatus::Inconclusive);
        assert_abs_diff_eq!(v.adjusted_confidence, 0.12, epsilon = 1e-9);
        assert_invariants(&v);
    }

    fn arb_row() -> impl Strategy<Value = AdRow> {
        (
            0usize..3,
            0usize..3,
            0i64..20,
            0.0f64..500.0,
            1.0f64..5000.0,
            0.0f64..1.0,
            0.0f64..2000.0,
        )
            .prop_map(|(campaign, platform, day, spend, impressions, click_rate, revenue)| {
                let mut r = row(
                    ["Alpha", "Beta", "Gamma"][campaign],
                    "2024-01-01",
                    spend,
                    impressions,
                    (impressions * click_rate * 0.1).floor(),
                    revenue,
                );
                r.date += Duration::days(day);
                r.platform = Some(["Meta", "TikTok", "Google"][platform].to_string());
                r
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn validation_invariants_hold(rows in prop::collection::vec(arb_row(), 0..60), min_points in 2usize..12) {
            let dataset = Dataset { rows, quality_issues: Vec::new() };
            let mut config = Config::default();
            config.agents.min_data_points = min_points;
            let summary = build_summary(&dataset, &config);
            let hypotheses = generate(&summary, "roas", &config);
            let validated = validate(&hypotheses, &dataset, &summary, &config);

            prop_assert_eq!(validated.len(), hypotheses.len());
            for (h, v) in hypotheses.iter().zip(&validated) {
                prop_assert_eq!(&h.hypothesis_id, &v.hypothesis.hypothesis_id);
                prop_assert!(v.evidence.metrics.len() >= 2);
                let names: HashSet<&str> = v.evidence.metrics.iter().map(|m| m.metric_name.as_str()).collect();
                prop_assert_eq!(names.len(), v.evidence.metrics.len());
                prop_assert!(v.adjusted_confidence.is_finite());
                prop_assert!((0.0..=1.0).contains(&v.adjusted_confidence));
                if v.validation_status == ValidationStatus::Rejected || v.evidence.genuine_metric_count() < 2 {
                    prop_assert!(v.adjusted_confidence < 0.6);
                }
                if v.validation_status == ValidationStatus::Confirmed {
                    prop_assert!(v.adjusted_confidence >= 0.3);
                }
                if let Some(sig) = &v.evidence.statistical_significance {
                    if let Some(p) = sig.p_value {
                        prop_assert!((0.0..=1.0).contains(&p));
                    }
                    if let Some([low, high]) = sig.confidence_interval {
                        prop_assert!(low <= high);
                    }
                }
            }
        }
    }
}
