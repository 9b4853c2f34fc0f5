//! Metric summaries and the statistics behind validation.

pub mod stats;
pub mod summary;

pub use summary::*;
