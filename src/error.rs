//! Error types for the insight engine.
//!
//! Only configuration problems and a total absence of input data abort a
//! run. Everything that can go wrong while evaluating a single hypothesis is
//! recovered inside the evaluator and surfaces as an `inconclusive` status.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to the caller of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration value. Fatal, raised before generation starts.
    #[error("invalid configuration `{field}` = {value}: {reason}")]
    Configuration {
        field: String,
        value: String,
        reason: String,
    },

    /// A summary or hypothesis input does not follow the expected shape.
    #[error("input contract violated at `{field}`: {detail}")]
    InputContract { field: String, detail: String },

    /// Nothing to analyse: empty dataset and empty summary.
    #[error("no input data: {reason}")]
    NoData { reason: String },

    /// The dataset file could not be read.
    #[error("failed to read dataset {}: {source}", path.display())]
    Dataset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dataset file was read but could not be decoded.
    #[error("malformed dataset {}: {detail}", path.display())]
    DatasetFormat { path: PathBuf, detail: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Build a configuration error for `field` holding `value`.
    pub fn configuration(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::Configuration {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the whole pipeline could plausibly succeed.
    ///
    /// The pipeline is side-effect free, so only I/O on the dataset is
    /// worth retrying; every other failure is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Dataset { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
