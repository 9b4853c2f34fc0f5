//! Metric summary: overall ratios, trends and segmentation.
//!
//! The summary is the only view of the data the hypothesis generator gets.
//! It can be built from a [`Dataset`] or decoded from JSON produced
//! elsewhere; every part is optional so a partial summary still loads.

use crate::analysis::stats::safe_ratio;
use crate::config::Config;
use crate::dataset::{AdRow, Dataset};
use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A categorical column the data can be segmented by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "by_campaign")]
    Campaign,
    #[serde(rename = "by_creative_type")]
    CreativeType,
    #[serde(rename = "by_audience_type")]
    AudienceType,
    #[serde(rename = "by_platform")]
    Platform,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Campaign,
        Dimension::CreativeType,
        Dimension::AudienceType,
        Dimension::Platform,
    ];

    /// Human-readable name of the dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Campaign => "campaign",
            Dimension::CreativeType => "creative type",
            Dimension::AudienceType => "audience",
            Dimension::Platform => "platform",
        }
    }

    /// Name of the segmentation key, e.g. `by_campaign`.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Campaign => "by_campaign",
            Dimension::CreativeType => "by_creative_type",
            Dimension::AudienceType => "by_audience_type",
            Dimension::Platform => "by_platform",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Ratio metrics the engine reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioMetric {
    /// revenue / spend
    Roas,
    /// clicks / impressions
    Ctr,
}

impl RatioMetric {
    pub const ALL: [RatioMetric; 2] = [RatioMetric::Roas, RatioMetric::Ctr];

    pub fn label(&self) -> &'static str {
        match self {
            RatioMetric::Roas => "ROAS",
            RatioMetric::Ctr => "CTR",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            RatioMetric::Roas => "roas",
            RatioMetric::Ctr => "ctr",
        }
    }

    /// Smallest baseline used when turning a gap into a percentage.
    pub fn baseline_floor(&self) -> f64 {
        match self {
            RatioMetric::Roas => 0.01,
            RatioMetric::Ctr => 0.0001,
        }
    }

    /// Format a value with the precision usual for the metric.
    pub fn format(&self, value: f64) -> String {
        match self {
            RatioMetric::Roas => format!("{:.2}", value),
            RatioMetric::Ctr => format!("{:.4}", value),
        }
    }
}

impl fmt::Display for RatioMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Summed counters over a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub rows: usize,
    pub spend: f64,
    pub revenue: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub purchases: f64,
}

impl Totals {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a AdRow>) -> Self {
        let mut totals = Self::default();
        for row in rows {
            totals.add(row);
        }
        totals
    }

    pub fn add(&mut self, row: &AdRow) {
        self.rows += 1;
        self.spend += row.spend;
        self.revenue += row.revenue;
        self.impressions += row.impressions;
        self.clicks += row.clicks;
        self.purchases += row.purchases.unwrap_or(0.0);
    }

    pub fn ratio(&self, metric: RatioMetric) -> f64 {
        match metric {
            RatioMetric::Roas => safe_ratio(self.revenue, self.spend),
            RatioMetric::Ctr => safe_ratio(self.clicks, self.impressions),
        }
    }

    /// Whether the ratio's denominator is non-zero.
    pub fn has_denominator(&self, metric: RatioMetric) -> bool {
        match metric {
            RatioMetric::Roas => self.spend > 0.0,
            RatioMetric::Ctr => self.impressions > 0.0,
        }
    }
}

/// Overall ratio metrics. Absent keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub overall_roas: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub overall_ctr: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub avg_cpc: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub conversion_rate: Option<f64>,
}

impl OverallMetrics {
    pub fn ratio(&self, metric: RatioMetric) -> Option<f64> {
        match metric {
            RatioMetric::Roas => self.overall_roas,
            RatioMetric::Ctr => self.overall_ctr,
        }
    }
}

/// Classified direction of a trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Week-over-week and month-over-month change of one metric, in percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    #[serde(default)]
    pub direction: TrendDirection,
    #[serde(default)]
    pub week_over_week_change: f64,
    #[serde(default)]
    pub month_over_month_change: f64,
}

impl Trend {
    /// `|WoW| + |MoM|`.
    pub fn combined_magnitude(&self) -> f64 {
        self.week_over_week_change.abs() + self.month_over_month_change.abs()
    }

    /// `WoW + MoM`; its sign says which way the metric moved.
    pub fn net_change(&self) -> f64 {
        self.week_over_week_change + self.month_over_month_change
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub roas_trend: Option<Trend>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ctr_trend: Option<Trend>,
}

impl Trends {
    pub fn get(&self, metric: RatioMetric) -> Option<&Trend> {
        match metric {
            RatioMetric::Roas => self.roas_trend.as_ref(),
            RatioMetric::Ctr => self.ctr_trend.as_ref(),
        }
    }
}

/// Aggregates for one value of a dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(
        alias = "campaign_name",
        alias = "creative_type",
        alias = "audience_type",
        alias = "platform"
    )]
    pub name: String,
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub roas: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub row_count: usize,
}

impl Segment {
    fn from_totals(name: String, totals: &Totals) -> Self {
        Self {
            name,
            spend: totals.spend,
            revenue: totals.revenue,
            impressions: totals.impressions,
            clicks: totals.clicks,
            roas: totals.ratio(RatioMetric::Roas),
            ctr: totals.ratio(RatioMetric::Ctr),
            row_count: totals.rows,
        }
    }

    pub fn ratio(&self, metric: RatioMetric) -> f64 {
        match metric {
            RatioMetric::Roas => self.roas,
            RatioMetric::Ctr => self.ctr,
        }
    }
}

/// Segment aggregates per dimension, each list ordered by spend descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    #[serde(default, deserialize_with = "lenient")]
    pub by_campaign: Vec<Segment>,
    #[serde(default, deserialize_with = "lenient")]
    pub by_creative_type: Vec<Segment>,
    #[serde(default, deserialize_with = "lenient")]
    pub by_audience_type: Vec<Segment>,
    #[serde(default, deserialize_with = "lenient")]
    pub by_platform: Vec<Segment>,
}

impl Segmentation {
    pub fn get(&self, dimension: Dimension) -> &[Segment] {
        match dimension {
            Dimension::Campaign => &self.by_campaign,
            Dimension::CreativeType => &self.by_creative_type,
            Dimension::AudienceType => &self.by_audience_type,
            Dimension::Platform => &self.by_platform,
        }
    }

    fn get_mut(&mut self, dimension: Dimension) -> &mut Vec<Segment> {
        match dimension {
            Dimension::Campaign => &mut self.by_campaign,
            Dimension::CreativeType => &mut self.by_creative_type,
            Dimension::AudienceType => &mut self.by_audience_type,
            Dimension::Platform => &mut self.by_platform,
        }
    }

    /// Dimensions that have at least one segment.
    pub fn populated(&self) -> impl Iterator<Item = (Dimension, &[Segment])> {
        Dimension::ALL
            .into_iter()
            .map(|d| (d, self.get(d)))
            .filter(|(_, segments)| !segments.is_empty())
    }
}

/// Inclusive range of dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Row-level facts about the dataset behind a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    #[serde(default)]
    pub total_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub total_spend: f64,
    #[serde(default)]
    pub total_revenue: f64,
    #[serde(default)]
    pub campaigns_count: usize,
    #[serde(default)]
    pub data_quality_issues: usize,
}

/// Immutable snapshot consumed by the hypothesis generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub dataset_summary: Option<DatasetSummary>,
    #[serde(default, deserialize_with = "lenient")]
    pub metrics: OverallMetrics,
    #[serde(default, deserialize_with = "lenient")]
    pub trends: Trends,
    #[serde(default, deserialize_with = "lenient")]
    pub segmentation: Segmentation,
}

/// Decode one summary field, falling back to its default when malformed.
///
/// A bad trend or segment list only drops its own rule family.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_else(|e| {
        debug!("Ignoring malformed summary field: {}", e);
        T::default()
    }))
}

impl MetricSummary {
    /// True when the summary carries nothing to reason about.
    pub fn is_empty(&self) -> bool {
        self.metrics == OverallMetrics::default()
            && self.trends == Trends::default()
            && self.segmentation.populated().next().is_none()
    }
}

/// Build a summary from cleaned rows.
pub fn build_summary(dataset: &Dataset, config: &Config) -> MetricSummary {
    let totals = Totals::from_rows(&dataset.rows);

    let metrics = OverallMetrics {
        overall_roas: Some(totals.ratio(RatioMetric::Roas)),
        overall_ctr: Some(totals.ratio(RatioMetric::Ctr)),
        avg_cpc: Some(safe_ratio(totals.spend, totals.clicks)),
        conversion_rate: Some(safe_ratio(totals.purchases, totals.clicks)),
    };

    let stable_threshold = config.thresholds.trend_stable_threshold * 100.0;
    let trends = if dataset.rows.is_empty() {
        Trends::default()
    } else {
        Trends {
            roas_trend: Some(compute_trend(&dataset.rows, RatioMetric::Roas, stable_threshold)),
            ctr_trend: Some(compute_trend(&dataset.rows, RatioMetric::Ctr, stable_threshold)),
        }
    };

    let mut segmentation = Segmentation::default();
    for dimension in Dimension::ALL {
        *segmentation.get_mut(dimension) = segment_rows(&dataset.rows, dimension);
    }

    let date_range = match (
        dataset.rows.iter().map(|r| r.date).min(),
        dataset.rows.iter().map(|r| r.date).max(),
    ) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        _ => None,
    };

    let dataset_summary = DatasetSummary {
        total_rows: totals.rows,
        date_range,
        total_spend: totals.spend,
        total_revenue: totals.revenue,
        campaigns_count: segmentation.by_campaign.len(),
        data_quality_issues: dataset.quality_issues.len(),
    };

    debug!(
        "Built summary over {} rows ({} campaigns)",
        totals.rows, dataset_summary.campaigns_count
    );

    MetricSummary {
        dataset_summary: Some(dataset_summary),
        metrics,
        trends,
        segmentation,
    }
}

/// Group rows by one dimension, ordered by spend descending.
pub fn segment_rows(rows: &[AdRow], dimension: Dimension) -> Vec<Segment> {
    let mut grouped: BTreeMap<&str, Totals> = BTreeMap::new();

    for row in rows {
        if let Some(value) = row.dimension_value(dimension) {
            grouped.entry(value).or_default().add(row);
        }
    }

    let mut segments: Vec<Segment> = grouped
        .into_iter()
        .map(|(name, totals)| Segment::from_totals(name.to_string(), &totals))
        .collect();

    // Names are already sorted, so equal spends keep alphabetical order.
    segments.sort_by(|a, b| b.spend.total_cmp(&a.spend));
    segments
}

fn compute_trend(rows: &[AdRow], metric: RatioMetric, stable_threshold: f64) -> Trend {
    let mut weekly: BTreeMap<(i32, u32), Totals> = BTreeMap::new();
    let mut monthly: BTreeMap<(i32, u32), Totals> = BTreeMap::new();

    for row in rows {
        let week = row.date.iso_week();
        weekly.entry((week.year(), week.week())).or_default().add(row);
        monthly
            .entry((row.date.year(), row.date.month()))
            .or_default()
            .add(row);
    }

    let week_over_week_change = last_bucket_change(&weekly, metric);
    let month_over_month_change = last_bucket_change(&monthly, metric);

    let average = (week_over_week_change.abs() + month_over_month_change.abs()) / 2.0;
    let direction = if average <= stable_threshold {
        TrendDirection::Stable
    } else if week_over_week_change > 0.0 || month_over_month_change > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    Trend {
        direction,
        week_over_week_change,
        month_over_month_change,
    }
}

/// Percent change between the last two buckets, `0.0` when undefined.
fn last_bucket_change(buckets: &BTreeMap<(i32, u32), Totals>, metric: RatioMetric) -> f64 {
    let mut recent = buckets.values().rev();
    let (Some(last), Some(prev)) = (recent.next(), recent.next()) else {
        return 0.0;
    };

    if !last.has_denominator(metric) || !prev.has_denominator(metric) {
        return 0.0;
    }

    let previous = prev.ratio(metric);
    if previous == 0.0 {
        return 0.0;
    }
    safe_ratio(last.ratio(metric) - previous, previous) * 100.0
}
