//! Markdown and JSON report generation.
//!
//! This module renders a [`Report`] as a Markdown document for people and
//! as pretty-printed JSON for downstream tools.

use crate::models::{
    Evidence, InsightsReport, Reasoning, Report, ReportMetadata, StatusSummary, ValidatedHypothesis,
    ValidationStatus,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let insights = &report.insights;
    let mut output = String::new();

    // Title
    output.push_str(&format!(
        "# AdInsight Report: {}\n\n",
        insights.focus_metric.to_uppercase()
    ));

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(insights));
    output.push_str(&generate_summary_section(&insights.summary));
    output.push_str(&generate_top_insights_section(insights));
    output.push_str(&generate_hypotheses_section(&insights.validated_hypotheses));
    output.push_str(&generate_reasoning_section(&insights.reasoning));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    if let Some(ref query) = metadata.query {
        section.push_str(&format!("- **Query:** {}\n", query));
    }
    section.push_str(&format!("- **Dataset:** `{}`\n", metadata.dataset_path));
    if let Some(ref range) = metadata.date_range {
        section.push_str(&format!("- **Date Range:** {}\n", range));
    }
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Rows Analyzed:** {}\n", metadata.rows_analyzed));
    section.push_str(&format!("- **Tool Version:** {}\n", metadata.tool_version));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(insights: &InsightsReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    if !insights.top_insights.is_empty() {
        toc.push_str("- [Top Insights](#top-insights)\n");
    }
    toc.push_str("- [Hypotheses](#hypotheses)\n");
    toc.push_str("- [Reasoning](#reasoning)\n");
    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(summary: &StatusSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| {} Confirmed | {} Rejected | {} Inconclusive | **Total** |\n",
        ValidationStatus::Confirmed.emoji(),
        ValidationStatus::Rejected.emoji(),
        ValidationStatus::Inconclusive.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        summary.confirmed, summary.rejected, summary.inconclusive, summary.total
    ));

    if !summary.by_category.is_empty() {
        section.push_str("### Hypotheses by Category\n\n");
        section.push_str("| Category | Count |\n");
        section.push_str("|:---|:---:|\n");
        for (category, count) in &summary.by_category {
            section.push_str(&format!("| {} | {} |\n", category, count));
        }
        section.push('\n');
    }

    section
}

fn generate_top_insights_section(insights: &InsightsReport) -> String {
    if insights.top_insights.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Top Insights\n\n");
    for (i, insight) in insights.top_insights.iter().enumerate() {
        section.push_str(&format!(
            "{}. {} (confidence: {:.2})\n",
            i + 1,
            insight.hypothesis_text,
            insight.validated_confidence
        ));
    }
    section.push('\n');

    section
}

/// Generate the hypotheses section, in ranked order.
fn generate_hypotheses_section(validated: &[ValidatedHypothesis]) -> String {
    let mut section = String::new();

    section.push_str("## Hypotheses\n\n");
    if validated.is_empty() {
        section.push_str("No hypotheses were generated.\n\n");
        return section;
    }

    for (rank, v) in validated.iter().enumerate() {
        section.push_str(&generate_hypothesis_block(rank + 1, v));
    }

    section
}

fn generate_hypothesis_block(rank: usize, v: &ValidatedHypothesis) -> String {
    let mut block = String::new();
    let h = &v.hypothesis;

    block.push_str(&format!(
        "### {}. {} {}\n\n",
        rank,
        v.validation_status.emoji(),
        h.text
    ));
    block.push_str(&format!(
        "**Status:** {} | **Category:** {} | **Confidence:** {:.2} → {:.2}\n\n",
        v.validation_status, h.category, h.initial_confidence, v.adjusted_confidence
    ));

    if !h.supporting_observations.is_empty() {
        block.push_str("**Observations:**\n\n");
        for observation in &h.supporting_observations {
            block.push_str(&format!("- {}\n", observation));
        }
        block.push('\n');
    }

    block.push_str(&generate_evidence_table(&v.evidence));
    block.push_str(&format!("> **Reasoning:** {}\n\n", v.validation_reasoning));
    block.push_str("---\n\n");

    block
}

fn generate_evidence_table(evidence: &Evidence) -> String {
    let mut table = String::new();

    table.push_str("| Metric | Value | Comparison |\n");
    table.push_str("|:---|---:|:---|\n");
    for metric in &evidence.metrics {
        let name = if metric.synthetic {
            format!("{} *(sample size)*", metric.metric_name)
        } else {
            metric.metric_name.clone()
        };
        table.push_str(&format!(
            "| {} | {:.4} | {} |\n",
            name, metric.value, metric.comparison
        ));
    }
    table.push('\n');

    if let Some(ref sig) = evidence.statistical_significance {
        let mut line = format!(
            "**Significance:** {} (n = {} vs {})",
            sig.test, sig.target_sample, sig.comparison_sample
        );
        if let Some(p) = sig.p_value {
            line.push_str(&format!(", p = {:.4}", p));
        }
        if let Some([low, high]) = sig.confidence_interval {
            line.push_str(&format!(", 95% CI [{:.4}, {:.4}]", low, high));
        }
        table.push_str(&line);
        table.push_str("\n\n");
    }

    table
}

fn generate_reasoning_section(reasoning: &Reasoning) -> String {
    let mut section = String::new();

    section.push_str("## Reasoning\n\n");
    section.push_str(&format!("**Think:** {}\n\n", reasoning.think));
    section.push_str("**Analyze:**\n\n");
    section.push_str(&reasoning.analyze);
    section.push_str("\n\n");
    section.push_str(&format!("**Conclude:** {}\n\n", reasoning.conclude));

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by AdInsight*\n");

    footer
}

/// Write the Markdown report to a file.
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_markdown_report(report);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file.
pub fn write_json_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
