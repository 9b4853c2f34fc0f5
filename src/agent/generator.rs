//! Hypothesis generation.
//!
//! Each rule family is a plain function from the summary to at most one
//! draft hypothesis. The generator runs them in a fixed order, truncates to
//! the configured maximum and back-fills with default templates so every
//! run yields at least three hypotheses.

use crate::analysis::stats::initial_confidence;
use crate::analysis::{Dimension, MetricSummary, RatioMetric, Segment};
use crate::config::Config;
use crate::models::{Category, Hypothesis, HypothesisTarget, TrendClaim};
use tracing::{debug, info};
use uuid::Uuid;

/// Namespace for hypothesis ids; ids hash the generation index and text.
const HYPOTHESIS_NAMESPACE: Uuid = Uuid::from_u128(0x6a1d_93c4_2f0e_4b7a_9c55_d1e8_07b3_a4f2);

/// Every run returns at least this many hypotheses.
pub const MIN_HYPOTHESES: usize = 3;

const TREND_REFERENCE: f64 = 20.0;
const SEGMENT_REFERENCE: f64 = 50.0;

/// A hypothesis before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub text: String,
    pub category: Category,
    pub observations: Vec<String>,
    pub evidence_refs: Vec<&'static str>,
    pub confidence: f64,
    pub validation_approach: &'static str,
    pub target: Option<HypothesisTarget>,
}

/// Values shared by every rule.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// Focus metric as shown in prose, e.g. `ROAS`.
    pub focus: String,
    /// Minimum `|WoW| + |MoM|`, in percentage points.
    pub trend_threshold: f64,
}

impl RuleContext {
    pub fn new(focus_metric: &str, config: &Config) -> Self {
        Self {
            focus: focus_metric.trim().to_uppercase(),
            trend_threshold: config.thresholds.trend_stable_threshold * 100.0,
        }
    }
}

pub type Rule = fn(&MetricSummary, &RuleContext) -> Option<Draft>;

/// Rule families in priority order.
pub const RULES: &[(&str, Rule)] = &[
    ("roas_trend", roas_trend),
    ("ctr_trend", ctr_trend),
    ("campaign", campaign_segmentation),
    ("creative_type", creative_segmentation),
    ("audience", audience_segmentation),
    ("platform", platform_comparison),
];

/// Generate between three and `max(3, agents.max_hypotheses)` hypotheses.
pub fn generate(summary: &MetricSummary, focus_metric: &str, config: &Config) -> Vec<Hypothesis> {
    let ctx = RuleContext::new(focus_metric, config);

    let mut drafts: Vec<Draft> = RULES
        .iter()
        .filter_map(|(name, rule)| {
            let draft = rule(summary, &ctx);
            if draft.is_none() {
                debug!("Rule family `{}` produced no hypothesis", name);
            }
            draft
        })
        .collect();

    let fired = drafts.len();
    drafts.truncate(config.agents.max_hypotheses);

    while drafts.len() < MIN_HYPOTHESES {
        drafts.push(default_draft(&ctx.focus, drafts.len()));
    }

    info!(
        "Generated {} hypotheses ({} from data, {} defaults)",
        drafts.len(),
        fired.min(config.agents.max_hypotheses),
        drafts.len() - fired.min(config.agents.max_hypotheses)
    );

    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| draft.into_hypothesis(index))
        .collect()
}

impl Draft {
    fn into_hypothesis(self, index: usize) -> Hypothesis {
        let seed = format!("{}:{}", index, self.text);
        Hypothesis {
            hypothesis_id: Uuid::new_v5(&HYPOTHESIS_NAMESPACE, seed.as_bytes()).to_string(),
            text: self.text,
            category: self.category,
            supporting_observations: self.observations,
            evidence_refs: self.evidence_refs.into_iter().map(String::from).collect(),
            initial_confidence: self.confidence,
            testable: true,
            validation_approach: self.validation_approach.to_string(),
            target: self.target,
        }
    }
}

pub fn roas_trend(summary: &MetricSummary, ctx: &RuleContext) -> Option<Draft> {
    let trend = summary.trends.roas_trend.as_ref()?;
    let magnitude = trend.combined_magnitude();
    if !(magnitude > ctx.trend_threshold) {
        return None;
    }

    let (wow, mom) = (trend.week_over_week_change, trend.month_over_month_change);
    let claim = claim_of(trend.net_change());
    let verb = match claim {
        TrendClaim::Declined => "declined",
        TrendClaim::Improved => "improved",
    };

    Some(Draft {
        text: format!("ROAS {} due to trend (WoW: {:.1}%, MoM: {:.1}%)", verb, wow, mom),
        category: Category::Seasonality,
        observations: vec![
            format!("Week-over-week ROAS change: {:.1}%", wow),
            format!("Month-over-month ROAS change: {:.1}%", mom),
            format!("Trend direction: {}", trend.direction),
        ],
        evidence_refs: vec!["roas_trend", "week_over_week_change", "month_over_month_change"],
        confidence: initial_confidence(magnitude, TREND_REFERENCE),
        validation_approach: "Compare ROAS across time periods and validate trend direction",
        target: Some(HypothesisTarget::Trend {
            metric: RatioMetric::Roas,
            claim,
        }),
    })
}

pub fn ctr_trend(summary: &MetricSummary, ctx: &RuleContext) -> Option<Draft> {
    let trend = summary.trends.ctr_trend.as_ref()?;
    let magnitude = trend.combined_magnitude();
    if !(magnitude > ctx.trend_threshold) {
        return None;
    }

    let (wow, mom) = (trend.week_over_week_change, trend.month_over_month_change);
    let claim = claim_of(trend.net_change());
    let text = match claim {
        TrendClaim::Declined => format!(
            "CTR decline (WoW: {:.1}%, MoM: {:.1}%) negatively impacted {}",
            wow, mom, ctx.focus
        ),
        TrendClaim::Improved => format!(
            "CTR improvement (WoW: {:.1}%, MoM: {:.1}%) positively impacted {}",
            wow, mom, ctx.focus
        ),
    };

    Some(Draft {
        text,
        category: Category::Creative,
        observations: vec![
            format!("Week-over-week CTR change: {:.1}%", wow),
            format!("Month-over-month CTR change: {:.1}%", mom),
            format!("CTR trend direction: {}", trend.direction),
        ],
        evidence_refs: vec!["ctr_trend", "week_over_week_change", "month_over_month_change"],
        confidence: initial_confidence(magnitude, TREND_REFERENCE),
        validation_approach: "Correlate CTR changes with ROAS changes across segments",
        target: Some(HypothesisTarget::Trend {
            metric: RatioMetric::Ctr,
            claim,
        }),
    })
}

pub fn campaign_segmentation(summary: &MetricSummary, ctx: &RuleContext) -> Option<Draft> {
    let overall = summary.metrics.overall_roas?;
    let (worst, count) = worst_below(
        summary.segmentation.get(Dimension::Campaign),
        RatioMetric::Roas,
        overall * 0.8,
    )?;

    Some(Draft {
        text: format!(
            "Campaign '{}' underperformance (ROAS: {:.2}) is dragging down overall {}",
            worst.name, worst.roas, ctx.focus
        ),
        category: Category::Budget,
        observations: vec![
            format!("Campaign ROAS: {:.2} vs Overall: {:.2}", worst.roas, overall),
            format!("Number of underperforming campaigns: {}", count),
            format!("Campaign spend: ${:.2}", worst.spend),
        ],
        evidence_refs: vec!["campaign_segmentation", "roas_by_campaign"],
        confidence: initial_confidence(relative_gap(overall, worst.roas, RatioMetric::Roas), SEGMENT_REFERENCE),
        validation_approach: "Compare campaign performance metrics and validate impact on overall ROAS",
        target: Some(HypothesisTarget::Segment {
            dimension: Dimension::Campaign,
            segment: worst.name.clone(),
            metric: RatioMetric::Roas,
        }),
    })
}

pub fn creative_segmentation(summary: &MetricSummary, _ctx: &RuleContext) -> Option<Draft> {
    let overall = summary.metrics.overall_ctr?;
    let (worst, _) = worst_below(
        summary.segmentation.get(Dimension::CreativeType),
        RatioMetric::Ctr,
        overall * 0.8,
    )?;
    let gap = relative_gap(overall, worst.ctr, RatioMetric::Ctr);

    Some(Draft {
        text: format!(
            "'{}' creative type underperforming with CTR of {:.4} vs overall {:.4}",
            worst.name, worst.ctr, overall
        ),
        category: Category::Creative,
        observations: vec![
            format!("Creative type CTR: {:.4}", worst.ctr),
            format!("Overall CTR: {:.4}", overall),
            format!("CTR gap: {:.1}%", gap),
        ],
        evidence_refs: vec!["creative_type_segmentation", "ctr_by_creative_type"],
        confidence: initial_confidence(gap, SEGMENT_REFERENCE),
        validation_approach: "Compare creative type performance and test correlation with overall metrics",
        target: Some(HypothesisTarget::Segment {
            dimension: Dimension::CreativeType,
            segment: worst.name.clone(),
            metric: RatioMetric::Ctr,
        }),
    })
}

pub fn audience_segmentation(summary: &MetricSummary, _ctx: &RuleContext) -> Option<Draft> {
    let overall = summary.metrics.overall_roas?;
    let (worst, _) = worst_below(
        summary.segmentation.get(Dimension::AudienceType),
        RatioMetric::Roas,
        overall * 0.7,
    )?;
    let gap = relative_gap(overall, worst.roas, RatioMetric::Roas);

    Some(Draft {
        text: format!(
            "Audience segment '{}' showing poor ROAS of {:.2} compared to overall {:.2}",
            worst.name, worst.roas, overall
        ),
        category: Category::Audience,
        observations: vec![
            format!("Audience ROAS: {:.2}", worst.roas),
            format!("Overall ROAS: {:.2}", overall),
            format!("Performance gap: {:.1}%", gap),
        ],
        evidence_refs: vec!["audience_segmentation", "roas_by_audience"],
        confidence: initial_confidence(gap, SEGMENT_REFERENCE),
        validation_approach: "Compare audience segment performance and validate impact on overall ROAS",
        target: Some(HypothesisTarget::Segment {
            dimension: Dimension::AudienceType,
            segment: worst.name.clone(),
            metric: RatioMetric::Roas,
        }),
    })
}

pub fn platform_comparison(summary: &MetricSummary, _ctx: &RuleContext) -> Option<Draft> {
    let platforms = summary.segmentation.get(Dimension::Platform);
    if platforms.len() < 2 {
        return None;
    }

    let mut sorted: Vec<&Segment> = platforms.iter().collect();
    sorted.sort_by(|a, b| a.roas.total_cmp(&b.roas));
    let (worst, best) = (sorted.first()?, sorted.last()?);

    if !(best.roas > worst.roas * 1.2) {
        return None;
    }

    let gap = (best.roas - worst.roas) / worst.roas.max(RatioMetric::Roas.baseline_floor()) * 100.0;

    Some(Draft {
        text: format!(
            "Platform '{}' (ROAS: {:.2}) underperforming compared to '{}' (ROAS: {:.2})",
            worst.name, worst.roas, best.name, best.roas
        ),
        category: Category::Platform,
        observations: vec![
            format!("{} ROAS: {:.2}", worst.name, worst.roas),
            format!("{} ROAS: {:.2}", best.name, best.roas),
            format!("Performance gap: {:.1}%", gap),
        ],
        evidence_refs: vec!["platform_segmentation", "roas_by_platform"],
        confidence: initial_confidence(gap, SEGMENT_REFERENCE),
        validation_approach: "Compare platform performance metrics and validate statistical significance",
        target: Some(HypothesisTarget::SegmentPair {
            dimension: Dimension::Platform,
            target: worst.name.clone(),
            comparison: best.name.clone(),
            metric: RatioMetric::Roas,
        }),
    })
}

fn claim_of(net_change: f64) -> TrendClaim {
    if net_change < 0.0 {
        TrendClaim::Declined
    } else {
        TrendClaim::Improved
    }
}

/// Lowest segment under `cutoff`, plus how many segments are under it.
/// Ties keep the earliest segment.
fn worst_below(segments: &[Segment], metric: RatioMetric, cutoff: f64) -> Option<(&Segment, usize)> {
    let under: Vec<&Segment> = segments
        .iter()
        .filter(|s| s.ratio(metric) < cutoff)
        .collect();
    let worst = under
        .iter()
        .copied()
        .min_by(|a, b| a.ratio(metric).total_cmp(&b.ratio(metric)))?;
    Some((worst, under.len()))
}

/// `|overall - value| / max(overall, floor) * 100`.
fn relative_gap(overall: f64, value: f64, metric: RatioMetric) -> f64 {
    (overall - value).abs() / overall.max(metric.baseline_floor()) * 100.0
}

/// Placeholder hypotheses, rotated by the current list length.
fn default_draft(focus: &str, index: usize) -> Draft {
    match index % 3 {
        0 => Draft {
            text: format!("Seasonal factors may be influencing {} performance", focus),
            category: Category::Seasonality,
            observations: vec!["Limited historical data available for trend analysis".to_string()],
            evidence_refs: vec!["time_period"],
            confidence: 0.4,
            validation_approach: "Collect more historical data to identify seasonal patterns",
            target: None,
        },
        1 => Draft {
            text: format!("Ad fatigue may be contributing to {} changes", focus),
            category: Category::Creative,
            observations: vec!["Creative performance may degrade over time".to_string()],
            evidence_refs: vec!["creative_age"],
            confidence: 0.35,
            validation_approach: "Analyze creative performance over time and test refresh impact",
            target: None,
        },
        _ => Draft {
            text: format!("Market competition changes may be affecting {}", focus),
            category: Category::Budget,
            observations: vec!["External market factors can impact performance".to_string()],
            evidence_refs: vec!["market_conditions"],
            confidence: 0.3,
            validation_approach: "Monitor competitive landscape and correlate with performance changes",
            target: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stats::approx_eq;
    use crate::analysis::{OverallMetrics, Trend, TrendDirection};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn segment(name: &str, roas: f64, ctr: f64) -> Segment {
        Segment {
            name: name.to_string(),
            spend: 100.0,
            revenue: roas * 100.0,
            roas,
            ctr,
            ..Segment::default()
        }
    }

    fn declining_roas_summary() -> MetricSummary {
        let mut summary = MetricSummary::default();
        summary.trends.roas_trend = Some(Trend {
            direction: TrendDirection::Decreasing,
            week_over_week_change: -12.0,
            month_over_month_change: -8.0,
        });
        summary
    }

    #[test]
    fn test_declining_roas_trend_with_backfill() {
        let hypotheses = generate(&declining_roas_summary(), "roas", &Config::default());
        assert_eq!(hypotheses.len(), 3);

        let trend = &hypotheses[0];
        assert_eq!(trend.category, Category::Seasonality);
        assert!(approx_eq(trend.initial_confidence, 0.8));
        assert!(trend.text.starts_with("ROAS declined"));
        assert_eq!(
            trend.target,
            Some(HypothesisTarget::Trend {
                metric: RatioMetric::Roas,
                claim: TrendClaim::Declined
            })
        );

        // Back-fill rotates on the list length, so it starts at index 1.
        assert_eq!(hypotheses[1].text, "Ad fatigue may be contributing to ROAS changes");
        assert_eq!(hypotheses[2].text, "Market competition changes may be affecting ROAS");
        assert!(hypotheses[1].target.is_none());
    }

    #[test]
    fn test_trend_below_threshold_is_skipped() {
        let mut summary = MetricSummary::default();
        summary.trends.ctr_trend = Some(Trend {
            direction: TrendDirection::Stable,
            week_over_week_change: 2.0,
            month_over_month_change: -2.0,
        });
        let ctx = RuleContext::new("ctr", &Config::default());
        assert!(ctr_trend(&summary, &ctx).is_none());
    }

    #[test]
    fn test_improving_ctr_trend() {
        let mut summary = MetricSummary::default();
        summary.trends.ctr_trend = Some(Trend {
            direction: TrendDirection::Increasing,
            week_over_week_change: 4.0,
            month_over_month_change: 3.0,
        });
        let ctx = RuleContext::new("roas", &Config::default());
        let draft = ctr_trend(&summary, &ctx).unwrap();
        assert_eq!(draft.category, Category::Creative);
        assert_eq!(
            draft.text,
            "CTR improvement (WoW: 4.0%, MoM: 3.0%) positively impacted ROAS"
        );
        assert!(approx_eq(draft.confidence, 0.3 + 0.5 * 7.0 / 20.0));
    }

    #[test]
    fn test_empty_summary_gets_three_defaults() {
        let hypotheses = generate(&MetricSummary::default(), "ctr", &Config::default());
        let categories: Vec<Category> = hypotheses.iter().map(|h| h.category).collect();
        assert_eq!(
            categories,
            vec![Category::Seasonality, Category::Creative, Category::Budget]
        );
        assert!(hypotheses[0].text.contains("CTR"));
    }

    #[test]
    fn test_platform_gap() {
        let mut summary = MetricSummary::default();
        summary.segmentation.by_platform = vec![segment("Meta", 3.0, 0.02), segment("TikTok", 1.0, 0.02)];
        let ctx = RuleContext::new("roas", &Config::default());
        let draft = platform_comparison(&summary, &ctx).unwrap();
        assert_eq!(draft.category, Category::Platform);
        assert!(approx_eq(draft.confidence, 0.8));
        assert_eq!(
            draft.target,
            Some(HypothesisTarget::SegmentPair {
                dimension: Dimension::Platform,
                target: "TikTok".to_string(),
                comparison: "Meta".to_string(),
                metric: RatioMetric::Roas,
            })
        );
    }

    #[test]
    fn test_platform_needs_twenty_percent_gap() {
        let mut summary = MetricSummary::default();
        summary.segmentation.by_platform = vec![segment("A", 1.1, 0.02), segment("B", 1.0, 0.02)];
        let ctx = RuleContext::new("roas", &Config::default());
        assert!(platform_comparison(&summary, &ctx).is_none());

        summary.segmentation.by_platform.truncate(1);
        assert!(platform_comparison(&summary, &ctx).is_none());
    }

    #[test]
    fn test_campaign_picks_worst_under_cutoff() {
        let mut summary = MetricSummary {
            metrics: OverallMetrics {
                overall_roas: Some(2.0),
                ..OverallMetrics::default()
            },
            ..MetricSummary::default()
        };
        summary.segmentation.by_campaign = vec![
            segment("Good", 2.5, 0.02),
            segment("Weak", 1.5, 0.02),
            segment("Worst", 1.0, 0.02),
        ];
        let ctx = RuleContext::new("roas", &Config::default());
        let draft = campaign_segmentation(&summary, &ctx).unwrap();
        assert_eq!(
            draft.text,
            "Campaign 'Worst' underperformance (ROAS: 1.00) is dragging down overall ROAS"
        );
        assert_eq!(draft.observations[1], "Number of underperforming campaigns: 2");
        // gap 50% of reference 50
        assert!(approx_eq(draft.confidence, 0.8));
    }

    #[test]
    fn test_missing_overall_metric_skips_family() {
        let mut summary = MetricSummary::default();
        summary.segmentation.by_campaign = vec![segment("A", 0.1, 0.001)];
        summary.segmentation.by_creative_type = vec![segment("Video", 0.1, 0.001)];
        let ctx = RuleContext::new("roas", &Config::default());
        assert!(campaign_segmentation(&summary, &ctx).is_none());
        assert!(creative_segmentation(&summary, &ctx).is_none());
    }

    #[test]
    fn test_truncation_keeps_rule_order() {
        let mut summary = declining_roas_summary();
        summary.metrics = OverallMetrics {
            overall_roas: Some(2.0),
            overall_ctr: Some(0.02),
            ..OverallMetrics::default()
        };
        summary.segmentation.by_campaign = vec![segment("Spring", 0.5, 0.02)];
        summary.segmentation.by_creative_type = vec![segment("Video", 2.0, 0.005)];
        summary.segmentation.by_audience_type = vec![segment("Broad", 0.4, 0.02)];
        summary.segmentation.by_platform = vec![segment("Meta", 3.0, 0.02), segment("TikTok", 1.0, 0.02)];

        let mut config = Config::default();
        config.agents.max_hypotheses = 4;
        let hypotheses = generate(&summary, "roas", &config);
        let categories: Vec<Category> = hypotheses.iter().map(|h| h.category).collect();
        assert_eq!(
            categories,
            vec![
                Category::Seasonality,
                Category::Budget,
                Category::Creative,
                Category::Audience
            ]
        );
    }

    #[test]
    fn test_floor_of_three_beats_small_maximum() {
        let mut config = Config::default();
        config.agents.max_hypotheses = 1;
        let hypotheses = generate(&declining_roas_summary(), "roas", &config);
        assert_eq!(hypotheses.len(), 3);
        assert_eq!(hypotheses[0].category, Category::Seasonality);
    }

    #[test]
    fn test_ids_are_deterministic_and_unique() {
        let first = generate(&declining_roas_summary(), "roas", &Config::default());
        let second = generate(&declining_roas_summary(), "roas", &Config::default());
        assert_eq!(first, second);
        let ids: HashSet<&str> = first.iter().map(|h| h.hypothesis_id.as_str()).collect();
        assert_eq!(ids.len(), first.len());
    }

    fn arb_segments() -> impl Strategy<Value = Vec<Segment>> {
        prop::collection::vec((0.0f64..5.0, 0.0f64..0.1), 0..5).prop_map(|values| {
            values
                .into_iter()
                .enumerate()
                .map(|(i, (roas, ctr))| segment(&format!("s{}", i), roas, ctr))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn generated_hypotheses_respect_bounds(
            wow in -60.0f64..60.0,
            mom in -60.0f64..60.0,
            overall_roas in 0.0f64..5.0,
            overall_ctr in 0.0f64..0.1,
            campaigns in arb_segments(),
            creatives in arb_segments(),
            platforms in arb_segments(),
            max_hypotheses in 1usize..8,
        ) {
            let mut summary = MetricSummary {
                metrics: OverallMetrics {
                    overall_roas: Some(overall_roas),
                    overall_ctr: Some(overall_ctr),
                    ..OverallMetrics::default()
                },
                ..MetricSummary::default()
            };
            summary.trends.roas_trend = Some(Trend { direction: TrendDirection::Stable, week_over_week_change: wow, month_over_month_change: mom });
            summary.segmentation.by_campaign = campaigns;
            summary.segmentation.by_creative_type = creatives;
            summary.segmentation.by_platform = platforms;

            let mut config = Config::default();
            config.agents.max_hypotheses = max_hypotheses;
            let hypotheses = generate(&summary, "roas", &config);

            prop_assert!(hypotheses.len() >= MIN_HYPOTHESES);
            prop_assert!(hypotheses.len() <= max_hypotheses.max(MIN_HYPOTHESES));

            let ids: HashSet<&str> = hypotheses.iter().map(|h| h.hypothesis_id.as_str()).collect();
            let texts: HashSet<&str> = hypotheses.iter().map(|h| h.text.as_str()).collect();
            prop_assert_eq!(ids.len(), hypotheses.len());
            prop_assert_eq!(texts.len(), hypotheses.len());

            for h in &hypotheses {
                prop_assert!(h.initial_confidence.is_finite());
                prop_assert!((0.0..=1.0).contains(&h.initial_confidence));
                prop_assert!(!h.validation_approach.is_empty());
            }
        }
    }
}
