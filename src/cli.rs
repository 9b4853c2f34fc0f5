//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::agent::pipeline::focus_from_query;
use crate::analysis::RatioMetric;
use clap::Parser;
use std::path::PathBuf;

/// AdInsight - evidence-backed explanations for ad performance changes
///
/// Generates hypotheses about ROAS and CTR movements from an ad
/// performance dataset, validates each against the data and ranks them
/// by calibrated confidence.
///
/// Examples:
///   adinsight "Why did ROAS drop last week?" --dataset ads.json
///   adinsight --dataset ads.jsonl --focus-metric ctr --format json
///   adinsight --summary summary.json --output-dir out/
///   adinsight --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Free-text question; picks the focus metric when --focus-metric is absent
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,

    /// Ad performance dataset (.csv, .json array or .jsonl)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "ADINSIGHT_DATASET",
        required_unless_present_any = ["init_config", "summary"]
    )]
    pub dataset: Option<PathBuf>,

    /// Precomputed metric summary (JSON) to use instead of building one
    #[arg(short, long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .adinsight.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for insights.json and report.md
    #[arg(short, long, default_value = "reports", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "both", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Metric to explain (overrides the query text)
    #[arg(long, value_name = "METRIC")]
    pub focus_metric: Option<FocusMetric>,

    /// Maximum number of hypotheses (at least three are always produced)
    #[arg(long, value_name = "COUNT")]
    pub max_hypotheses: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .adinsight.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown report only
    Markdown,
    /// insights.json only
    Json,
    /// Both files (default)
    #[default]
    Both,
}

impl OutputFormat {
    pub fn writes_markdown(&self) -> bool {
        matches!(self, OutputFormat::Markdown | OutputFormat::Both)
    }

    pub fn writes_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

/// Metric selectable with --focus-metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FocusMetric {
    Roas,
    Ctr,
}

impl From<FocusMetric> for RatioMetric {
    fn from(focus: FocusMetric) -> Self {
        match focus {
            FocusMetric::Roas => RatioMetric::Roas,
            FocusMetric::Ctr => RatioMetric::Ctr,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.max_hypotheses == Some(0) {
            return Err("Max hypotheses must be at least 1".to_string());
        }

        for (flag, path) in [("--dataset", &self.dataset), ("--summary", &self.summary)] {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(format!("{} file does not exist: {}", flag, path.display()));
                }
            }
        }

        Ok(())
    }

    /// Focus metric from the flag, else from the query text.
    pub fn effective_focus(&self) -> RatioMetric {
        match self.focus_metric {
            Some(focus) => focus.into(),
            None => focus_from_query(self.query.as_deref().unwrap_or("")),
        }
    }
}
