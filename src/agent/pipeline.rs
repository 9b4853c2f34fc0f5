//! Generator, evaluator and ranker wired into one run.
//!
//! A run has no side effects, so the retry wrapper can repeat it freely.

use crate::agent::{evaluator, generator, ranker};
use crate::analysis::{DateRange, MetricSummary, RatioMetric};
use crate::config::{Config, RetrySettings};
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};
use crate::models::{Hypothesis, InsightsReport, Reasoning, StatusSummary, ValidatedHypothesis};
use chrono::{Days, NaiveDate};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

/// Run the full engine on one summary and dataset.
pub fn run_pipeline(
    summary: &MetricSummary,
    dataset: &Dataset,
    focus_metric: &str,
    config: &Config,
) -> EngineResult<InsightsReport> {
    config.validate()?;

    if dataset.is_empty() && summary.is_empty() {
        return Err(EngineError::NoData {
            reason: "the dataset has no usable rows and the summary is empty".to_string(),
        });
    }

    let hypotheses = generator::generate(summary, focus_metric, config);
    let validated = evaluator::validate(&hypotheses, dataset, summary, config);
    let (validated_hypotheses, top_insights) = ranker::rank(validated);
    let status = StatusSummary::from_validated(&validated_hypotheses);

    info!(
        "Pipeline finished: {} hypotheses, {} confirmed, {} rejected, {} inconclusive",
        status.total, status.confirmed, status.rejected, status.inconclusive
    );

    let reasoning = build_reasoning(summary, focus_metric, config, &hypotheses, &validated_hypotheses);

    Ok(InsightsReport {
        focus_metric: focus_metric.trim().to_lowercase(),
        hypotheses,
        validated_hypotheses,
        top_insights,
        summary: status,
        reasoning,
    })
}

/// Retry `op` with exponential backoff while it fails with a retryable error.
pub fn run_with_retry<T, F>(settings: &RetrySettings, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> EngineResult<T>,
{
    let mut attempt: u32 = 0;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < settings.max_retries => {
                let delay = backoff_delay(settings, attempt);
                attempt += 1;
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    settings.max_retries + 1,
                    e,
                    delay
                );
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// `base_delay_ms * backoff_multiplier ^ attempt`.
pub fn backoff_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let millis = settings.base_delay_ms as f64 * settings.backoff_multiplier.powi(exponent);
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    } else {
        Duration::ZERO
    }
}

/// Pick the focus metric from free text: anything mentioning CTR or clicks
/// is about CTR, everything else about ROAS.
pub fn focus_from_query(query: &str) -> RatioMetric {
    let query = query.to_lowercase();
    if query.contains("ctr") || query.contains("click") {
        RatioMetric::Ctr
    } else {
        RatioMetric::Roas
    }
}

const RELATIVE_WINDOWS: [(&[&str], u64); 3] = [
    (&["last 7 days", "past 7 days", "last week"], 7),
    (&["last 14 days", "past 14 days", "last 2 weeks"], 14),
    (&["last 30 days", "past 30 days", "last month"], 30),
];

/// Date window named in free text, anchored to `latest` (the newest row)
/// so the same query over the same data always selects the same rows.
///
/// Relative phrases cover the last N days including `latest`; otherwise the
/// first two `YYYY-MM-DD` dates in the text bound the window.
pub fn date_range_from_query(query: &str, latest: NaiveDate) -> Option<DateRange> {
    let query = query.to_lowercase();

    for (phrases, days) in RELATIVE_WINDOWS {
        if phrases.iter().any(|p| query.contains(p)) {
            return Some(DateRange {
                start: latest.checked_sub_days(Days::new(days - 1))?,
                end: latest,
            });
        }
    }

    let bytes = query.as_bytes();
    let dates: Vec<NaiveDate> = (0..bytes.len().saturating_sub(9))
        .filter(|&i| looks_like_iso_date(&bytes[i..i + 10]))
        .filter_map(|i| NaiveDate::parse_from_str(&query[i..i + 10], "%Y-%m-%d").ok())
        .collect();

    match dates.as_slice() {
        [first, second, ..] => Some(DateRange {
            start: *first.min(second),
            end: *first.max(second),
        }),
        _ => None,
    }
}

fn looks_like_iso_date(window: &[u8]) -> bool {
    window.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    })
}

fn build_reasoning(
    summary: &MetricSummary,
    focus_metric: &str,
    config: &Config,
    hypotheses: &[Hypothesis],
    ranked: &[ValidatedHypothesis],
) -> Reasoning {
    let focus = focus_metric.trim().to_uppercase();
    let metrics = &summary.metrics;

    let mut think = format!("Analyzing data to understand {} performance changes. ", focus);
    match focus.as_str() {
        "CTR" => {
            if let Some(ctr) = metrics.overall_ctr {
                think.push_str(&format!("Current overall CTR: {:.4}. ", ctr));
            }
        }
        _ => {
            if let Some(roas) = metrics.overall_roas {
                think.push_str(&format!("Current overall ROAS: {:.2}. ", roas));
            }
        }
    }
    if summary.trends.roas_trend.is_some() || summary.trends.ctr_trend.is_some() {
        think.push_str("Trend data available for analysis. ");
    }
    think.push_str(&format!(
        "Segmentation data available across {} dimensions.",
        summary.segmentation.populated().count()
    ));

    let mut analyze = String::from("Data pattern analysis:\n");
    for metric in RatioMetric::ALL {
        if let Some(trend) = summary.trends.get(metric) {
            analyze.push_str(&format!(
                "- {} trend: {} (WoW: {:.1}%, MoM: {:.1}%)\n",
                metric, trend.direction, trend.week_over_week_change, trend.month_over_month_change
            ));
        }
    }
    if let Some(trend) = summary.trends.roas_trend.as_ref() {
        let significant = config.thresholds.roas_change_significant * 100.0;
        if trend.week_over_week_change.abs() >= significant
            || trend.month_over_month_change.abs() >= significant
        {
            analyze.push_str(&format!(
                "- ROAS moved by at least {:.0}% over one period\n",
                significant
            ));
        }
    }
    if let Some(ctr) = metrics.overall_ctr {
        if ctr < config.thresholds.low_ctr {
            analyze.push_str(&format!(
                "- Overall CTR {:.4} is below the {:.4} low-CTR threshold\n",
                ctr, config.thresholds.low_ctr
            ));
        }
    }
    for (dimension, segments) in summary.segmentation.populated() {
        analyze.push_str(&format!(
            "- {}: {} segments identified\n",
            dimension.key(),
            segments.len()
        ));
    }
    let categories: BTreeSet<String> = hypotheses.iter().map(|h| h.category.to_string()).collect();
    analyze.push_str(&format!(
        "\nGenerated {} hypotheses across categories: {}",
        hypotheses.len(),
        categories.into_iter().collect::<Vec<_>>().join(", ")
    ));

    let status = StatusSummary::from_validated(ranked);
    let mut conclude = format!(
        "Validated {} hypotheses about {}: {} confirmed, {} rejected, {} inconclusive. ",
        status.total, focus, status.confirmed, status.rejected, status.inconclusive
    );
    if let Some(top) = ranked.first() {
        conclude.push_str(&format!(
            "Top insight (confidence: {:.2}): {}. ",
            top.adjusted_confidence, top.hypothesis.text
        ));
    }
    let strong = ranked
        .iter()
        .filter(|v| v.adjusted_confidence >= config.thresholds.high_confidence)
        .count();
    conclude.push_str(&format!(
        "{} insight{} at or above the {:.2} high-confidence threshold.",
        strong,
        if strong == 1 { "" } else { "s" },
        config.thresholds.high_confidence
    ));

    Reasoning {
        think,
        analyze,
        conclude,
    }
}
