//! The hypothesis engine.
//!
//! Generation, validation and ranking run strictly in sequence; the
//! pipeline module ties them together.

pub mod evaluator;
pub mod generator;
pub mod pipeline;
pub mod ranker;

pub use pipeline::{date_range_from_query, run_pipeline, run_with_retry};
