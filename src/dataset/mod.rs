//! Ad performance dataset loading and cleaning.
//!
//! Rows are read from CSV with a header line (`.csv`), a JSON array
//! (`.json`) or newline-delimited JSON (`.jsonl`). Numbers may be JSON
//! numbers or numeric strings. Rows that
//! cannot be used are dropped and recorded as data quality issues instead
//! of failing the load.

use crate::analysis::{DateRange, Dimension};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const REQUIRED_NUMERIC: [&str; 4] = ["spend", "impressions", "clicks", "revenue"];

/// One cleaned row of ad delivery data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRow {
    pub campaign_name: String,
    pub date: NaiveDate,
    pub spend: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub revenue: f64,
    #[serde(default)]
    pub purchases: Option<f64>,
    #[serde(default)]
    pub creative_type: Option<String>,
    #[serde(default)]
    pub audience_type: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub adset_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl AdRow {
    /// Value of the row for a segmentation dimension.
    pub fn dimension_value(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Campaign => Some(self.campaign_name.as_str()),
            Dimension::CreativeType => self.creative_type.as_deref(),
            Dimension::AudienceType => self.audience_type.as_deref(),
            Dimension::Platform => self.platform.as_deref(),
        }
    }
}

/// Kind of problem found while cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingValues,
    InvalidDates,
    NonNumericValues,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::MissingValues => write!(f, "missing_values"),
            IssueKind::InvalidDates => write!(f, "invalid_dates"),
            IssueKind::NonNumericValues => write!(f, "non_numeric_values"),
        }
    }
}

/// A row excluded during cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityIssue {
    pub kind: IssueKind,
    pub field: String,
    /// Zero-based position of the record in the input.
    pub record: usize,
}

/// Cleaned rows plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<AdRow>,
    pub quality_issues: Vec<DataQualityIssue>,
}

impl Dataset {
    /// Load and clean a dataset file.
    pub fn load(path: &Path, config: &Config) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::Dataset {
            path: path.to_path_buf(),
            source,
        })?;

        let records = parse_records(path, &content)?;
        let dataset = Self::from_records(records, &config.data_quality.date_format);

        info!(
            "Loaded {} rows from {} ({} excluded)",
            dataset.rows.len(),
            path.display(),
            dataset.quality_issues.len()
        );

        Ok(dataset)
    }

    /// Clean raw JSON records into rows.
    pub fn from_records(records: Vec<Value>, date_format: &str) -> Self {
        let mut dataset = Self::default();

        for (index, record) in records.into_iter().enumerate() {
            let Value::Object(fields) = record else {
                dataset.quality_issues.push(DataQualityIssue {
                    kind: IssueKind::MissingValues,
                    field: "record".to_string(),
                    record: index,
                });
                continue;
            };

            match clean_record(&fields, date_format) {
                Ok(row) => dataset.rows.push(row),
                Err((kind, field)) => {
                    debug!("Excluding record {}: {} in `{}`", index, kind, field);
                    dataset.quality_issues.push(DataQualityIssue {
                        kind,
                        field,
                        record: index,
                    });
                }
            }
        }

        if !dataset.quality_issues.is_empty() {
            warn!(
                "{} records excluded during cleaning",
                dataset.quality_issues.len()
            );
        }

        dataset
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Date of the newest row.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.date).max()
    }

    /// Copy of the dataset restricted to rows inside `range`.
    ///
    /// Quality issues are kept: they describe the file, not the window.
    pub fn within(&self, range: &DateRange) -> Self {
        let rows: Vec<AdRow> = self
            .rows
            .iter()
            .filter(|r| range.contains(r.date))
            .cloned()
            .collect();

        info!(
            "Date filter {} kept {} of {} rows",
            range,
            rows.len(),
            self.rows.len()
        );

        Self {
            rows,
            quality_issues: self.quality_issues.clone(),
        }
    }

    /// Number of issues of one kind.
    pub fn issue_count(&self, kind: IssueKind) -> usize {
        self.quality_issues.iter().filter(|i| i.kind == kind).count()
    }
}

fn parse_records(path: &Path, content: &str) -> EngineResult<Vec<Value>> {
    let format_error = |detail: String| EngineError::DatasetFormat {
        path: path.to_path_buf(),
        detail,
    };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if extension == "csv" {
        return parse_csv(content).map_err(|e| format_error(e.to_string()));
    }

    if extension == "jsonl" || extension == "ndjson" {
        return content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| format_error(format!("line {}: {}", n + 1, e)))
            })
            .collect();
    }

    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(records)) => Ok(records),
        Ok(_) => Err(format_error("expected a JSON array of records".to_string())),
        Err(e) => Err(format_error(e.to_string())),
    }
}

/// Read CSV rows as string-valued records keyed by header.
///
/// Empty cells are left out so they clean as missing values.
fn parse_csv(content: &str) -> Result<Vec<Value>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    reader
        .records()
        .map(|record| {
            let record = record?;
            let fields: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
                .collect();
            Ok(Value::Object(fields))
        })
        .collect()
}

type CleanError = (IssueKind, String);

fn clean_record(fields: &Map<String, Value>, date_format: &str) -> Result<AdRow, CleanError> {
    let campaign_name =
        text_field(fields, "campaign_name").ok_or((IssueKind::MissingValues, "campaign_name".to_string()))?;

    let date = match fields.get("date") {
        None | Some(Value::Null) => return Err((IssueKind::MissingValues, "date".to_string())),
        Some(Value::String(s)) => NaiveDate::parse_from_str(s.trim(), date_format)
            .map_err(|_| (IssueKind::InvalidDates, "date".to_string()))?,
        Some(_) => return Err((IssueKind::InvalidDates, "date".to_string())),
    };

    let mut numbers = [0.0; 4];
    for (slot, name) in numbers.iter_mut().zip(REQUIRED_NUMERIC) {
        *slot = numeric_field(fields, name)?.ok_or((IssueKind::MissingValues, name.to_string()))?;
    }
    let [spend, impressions, clicks, revenue] = numbers;

    Ok(AdRow {
        campaign_name,
        date,
        spend,
        impressions,
        clicks,
        revenue,
        purchases: numeric_field(fields, "purchases")?,
        creative_type: text_field(fields, "creative_type"),
        audience_type: text_field(fields, "audience_type"),
        platform: text_field(fields, "platform"),
        adset_name: text_field(fields, "adset_name"),
        country: text_field(fields, "country"),
    })
}

/// Numeric column: `Ok(None)` when absent, an error when present but unusable.
fn numeric_field(fields: &Map<String, Value>, name: &str) -> Result<Option<f64>, CleanError> {
    let non_numeric = || (IssueKind::NonNumericValues, name.to_string());
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).map(Some).ok_or_else(non_numeric),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(non_numeric),
        Some(_) => Err(non_numeric()),
    }
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

struct CacheEntry {
    path: PathBuf,
    modified: Option<SystemTime>,
    dataset: Arc<Dataset>,
}

/// Single-entry dataset cache keyed by path and modification time.
#[derive(Default)]
pub struct DatasetCache {
    entry: Mutex<Option<CacheEntry>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached dataset for `path`, reloading when the file changed.
    pub fn load(&self, path: &Path, config: &Config) -> EngineResult<Arc<Dataset>> {
        let key = std::fs::canonicalize(path).map_err(|source| EngineError::Dataset {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = std::fs::metadata(&key).and_then(|m| m.modified()).ok();

        let mut guard = self.entry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = guard.as_ref() {
            if entry.path == key && entry.modified.is_some() && entry.modified == modified {
                debug!("Dataset cache hit for {}", key.display());
                return Ok(Arc::clone(&entry.dataset));
            }
        }

        let dataset = Arc::new(Dataset::load(&key, config)?);
        *guard = Some(CacheEntry {
            path: key,
            modified,
            dataset: Arc::clone(&dataset),
        });
        Ok(dataset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    /// Row fixture shared with other modules' tests.
    pub(crate) fn row(
        campaign: &str,
        date: &str,
        spend: f64,
        impressions: f64,
        clicks: f64,
        revenue: f64,
    ) -> AdRow {
        AdRow {
            campaign_name: campaign.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            spend,
            impressions,
            clicks,
            revenue,
            purchases: None,
            creative_type: None,
            audience_type: None,
            platform: None,
            adset_name: None,
            country: None,
        }
    }

    #[test]
    fn test_clean_accepts_numeric_strings() {
        let records = vec![json!({
            "campaign_name": "Spring",
            "date": "2024-03-01",
            "spend": "100.5",
            "impressions": 1000,
            "clicks": "25",
            "revenue": 300,
            "platform": "Facebook"
        })];
        let ds = Dataset::from_records(records, "%Y-%m-%d");
        assert_eq!(ds.rows.len(), 1);
        assert!(ds.quality_issues.is_empty());
        let r = &ds.rows[0];
        assert_eq!(r.spend, 100.5);
        assert_eq!(r.clicks, 25.0);
        assert_eq!(r.dimension_value(Dimension::Platform), Some("Facebook"));
        assert_eq!(r.dimension_value(Dimension::AudienceType), None);
    }

    #[test]
    fn test_clean_records_issues() {
        let records = vec![
            json!({"campaign_name": "A", "date": "2024-03-01", "spend": 1, "impressions": 1, "clicks": 1}),
            json!({"campaign_name": "B", "date": "03/01/2024", "spend": 1, "impressions": 1, "clicks": 1, "revenue": 1}),
            json!({"campaign_name": "C", "date": "2024-03-01", "spend": "lots", "impressions": 1, "clicks": 1, "revenue": 1}),
            json!({"campaign_name": "D", "date": "2024-03-02", "spend": 1, "impressions": 1, "clicks": 1, "revenue": 1}),
            json!("not an object"),
        ];
        let ds = Dataset::from_records(records, "%Y-%m-%d");
        assert_eq!(ds.rows.len(), 1);
        assert_eq!(ds.rows[0].campaign_name, "D");
        assert_eq!(ds.issue_count(IssueKind::MissingValues), 2);
        assert_eq!(ds.issue_count(IssueKind::InvalidDates), 1);
        assert_eq!(ds.issue_count(IssueKind::NonNumericValues), 1);
        assert_eq!(ds.quality_issues[0].field, "revenue");
    }

    #[test]
    fn test_load_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let json_path = dir.path().join("ads.json");
        std::fs::write(
            &json_path,
            r#"[{"campaign_name": "A", "date": "2024-01-01", "spend": 10, "impressions": 100, "clicks": 5, "revenue": 20}]"#,
        )
        .unwrap();
        assert_eq!(Dataset::load(&json_path, &config).unwrap().rows.len(), 1);

        let jsonl_path = dir.path().join("ads.jsonl");
        let mut file = std::fs::File::create(&jsonl_path).unwrap();
        writeln!(file, r#"{{"campaign_name": "A", "date": "2024-01-01", "spend": 10, "impressions": 100, "clicks": 5, "revenue": 20}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"campaign_name": "B", "date": "2024-01-02", "spend": 10, "impressions": 100, "clicks": 5, "revenue": 20}}"#).unwrap();
        assert_eq!(Dataset::load(&jsonl_path, &config).unwrap().rows.len(), 2);
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads.csv");
        std::fs::write(
            &path,
            "campaign_name,adset_name,date,spend,impressions,clicks,purchases,revenue,creative_type,platform\n\
             Spring_Sale,Spring_Meta,2024-03-01,100.5,1000,25,3,300,Image,Facebook\n\
             Spring_Sale,Spring_Meta,2024-03-02, 80 ,900,20,,150,Image,Instagram\n\
             Spring_Sale,Spring_Meta,2024-03-03,lots,900,20,1,150,Image,Facebook\n\
             Spring_Sale,Spring_Meta,,50,900,20,1,150,Image,Facebook\n",
        )
        .unwrap();

        let ds = Dataset::load(&path, &Config::default()).unwrap();
        assert_eq!(ds.rows.len(), 2);
        assert_eq!(ds.rows[0].spend, 100.5);
        assert_eq!(ds.rows[0].purchases, Some(3.0));
        assert_eq!(ds.rows[1].spend, 80.0);
        assert_eq!(ds.rows[1].purchases, None);
        assert_eq!(ds.rows[1].dimension_value(Dimension::Platform), Some("Instagram"));
        assert_eq!(ds.issue_count(IssueKind::NonNumericValues), 1);
        assert_eq!(ds.issue_count(IssueKind::MissingValues), 1);
        assert_eq!(ds.quality_issues[1].field, "date");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let missing = Dataset::load(&dir.path().join("nope.json"), &config).unwrap_err();
        assert!(matches!(missing, EngineError::Dataset { .. }));
        assert!(missing.is_retryable());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"rows": []}"#).unwrap();
        let err = Dataset::load(&bad, &config).unwrap_err();
        assert!(matches!(err, EngineError::DatasetFormat { .. }));
    }

    #[test]
    fn test_cache_reuses_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads.json");
        let other = dir.path().join("other.json");
        let content = r#"[{"campaign_name": "A", "date": "2024-01-01", "spend": 10, "impressions": 100, "clicks": 5, "revenue": 20}]"#;
        std::fs::write(&path, content).unwrap();
        std::fs::write(&other, content).unwrap();

        let cache = DatasetCache::new();
        let config = Config::default();
        let first = cache.load(&path, &config).unwrap();
        let second = cache.load(&path, &config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Single entry: loading another file evicts the first.
        cache.load(&other, &config).unwrap();
        let third = cache.load(&path, &config).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }
}
