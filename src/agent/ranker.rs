//! Ranking and top insight selection.

use crate::models::{RankedInsight, ValidatedHypothesis};

/// Number of entries projected into the top insights.
pub const TOP_INSIGHTS: usize = 3;

/// Sort by adjusted confidence, highest first. The sort is stable, so equal
/// scores keep generation order.
pub fn rank(mut validated: Vec<ValidatedHypothesis>) -> (Vec<ValidatedHypothesis>, Vec<RankedInsight>) {
    validated.sort_by(|a, b| b.adjusted_confidence.total_cmp(&a.adjusted_confidence));

    let top = validated
        .iter()
        .take(TOP_INSIGHTS)
        .map(RankedInsight::from)
        .collect();

    (validated, top)
}
