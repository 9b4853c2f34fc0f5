//! AdInsight - hypothesis generation and validation for ad performance
//!
//! A CLI tool that explains ROAS and CTR movements in an ad performance
//! dataset: it proposes hypotheses, tests each one against the data and
//! ranks them by calibrated confidence.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (invalid config, unreadable dataset, no data, etc.)

mod agent;
mod analysis;
mod cli;
mod config;
mod dataset;
mod error;
mod models;
mod report;

use analysis::MetricSummary;
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, LogFormat, LoggingConfig, DEFAULT_CONFIG_FILE};
use dataset::{Dataset, DatasetCache, IssueKind};
use error::{EngineError, EngineResult};
use models::{Report, ReportMetadata};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    init_logging(&config.logging)?;

    info!("AdInsight v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(&args, &config) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .adinsight.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to tune thresholds, confidence weights and retries.");
    Ok(())
}

/// Initialize logging from the merged logging settings.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let installed = match logging.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };

    installed.context("Failed to set tracing subscriber")
}

/// Run the complete analysis workflow. Returns the exit code.
fn run_analysis(args: &Args, config: &Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate()?;

    let focus = args.effective_focus();
    let cache = DatasetCache::new();

    println!("🔎 Focus metric: {}", focus);

    // Step 1-3: load, summarize and run the engine, retrying I/O failures
    let (dataset, date_range, insights) = agent::run_with_retry(&config.retry, || {
        let mut dataset = match args.dataset {
            Some(ref path) => cache.load(path, config)?,
            None => Arc::new(Dataset::default()),
        };

        // Windows such as "last 7 days" count back from the newest row.
        let date_range = args
            .query
            .as_deref()
            .zip(dataset.latest_date())
            .and_then(|(query, latest)| agent::date_range_from_query(query, latest));
        if let Some(ref range) = date_range {
            dataset = Arc::new(dataset.within(range));
        }

        let summary = match args.summary {
            Some(ref path) => load_summary(path)?,
            None => analysis::build_summary(&dataset, config),
        };

        let insights = agent::run_pipeline(&summary, &dataset, focus.key(), config)?;
        Ok((dataset, date_range, insights))
    })?;

    // Step 4: Build the report
    println!("\n📝 Generating report...");

    let metadata = ReportMetadata {
        generated_at: Utc::now(),
        dataset_path: args
            .dataset
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        rows_analyzed: dataset.rows.len(),
        query: args.query.clone(),
        date_range,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let report = Report { metadata, insights };

    // Step 5: Save the report
    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    if args.format.writes_json() {
        let path = args.output_dir.join("insights.json");
        report::write_json_report(&report, &path)?;
        info!("Wrote {}", path.display());
    }

    if args.format.writes_markdown() {
        let path = args.output_dir.join("report.md");
        report::write_report(&report, &path)?;
        info!("Wrote {}", path.display());
    }

    // Print summary
    let summary = &report.insights.summary;
    println!("\n📊 Analysis Summary:");
    println!("   Rows analyzed: {}", report.metadata.rows_analyzed);
    if !dataset.quality_issues.is_empty() {
        println!(
            "   Rows excluded: {} ({}: {}, {}: {}, {}: {})",
            dataset.quality_issues.len(),
            IssueKind::MissingValues,
            dataset.issue_count(IssueKind::MissingValues),
            IssueKind::InvalidDates,
            dataset.issue_count(IssueKind::InvalidDates),
            IssueKind::NonNumericValues,
            dataset.issue_count(IssueKind::NonNumericValues),
        );
    }
    println!("   Hypotheses: {}", summary.total);
    println!(
        "   - ✅ Confirmed: {} | ❌ Rejected: {} | ❔ Inconclusive: {}",
        summary.confirmed, summary.rejected, summary.inconclusive
    );
    for (i, insight) in report.insights.top_insights.iter().enumerate() {
        println!(
            "   {}. {} ({:.2})",
            i + 1,
            insight.hypothesis_text,
            insight.validated_confidence
        );
    }
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!(
        "\n✅ Analysis complete! Reports saved to: {}",
        args.output_dir.display()
    );

    Ok(0)
}

/// Read a precomputed metric summary.
fn load_summary(path: &Path) -> EngineResult<MetricSummary> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::InputContract {
        field: "summary".to_string(),
        detail: format!("cannot read {}: {}", path.display(), e),
    })?;

    Ok(serde_json::from_str(&content)?)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is initialized, so problems go to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}
