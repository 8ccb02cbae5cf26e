use std::collections::BTreeMap;

use crate::error::execution_error;
use crate::settings::ComparisonSpec;
use crate::StitchError;

/// Comparison-vector value marking a pair where either side is null; such
/// pairs are excluded from the u denominator.
pub const NULL_VECTOR_VALUE: i64 = -1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelUEstimate {
    pub vector_value: i64,
    pub label: String,
    pub pair_count: u64,
    pub u_probability: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComparisonUEstimate {
    pub column: String,
    pub observed_pairs: u64,
    pub levels: Vec<LevelUEstimate>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UEstimateReport {
    pub comparisons: Vec<ComparisonUEstimate>,
}

/// Turns grouped comparison-vector counts into per-level u probabilities.
/// The u probability of a level is the share of admissible (non-null) pairs
/// observed at that level.
pub(crate) fn estimate_for_comparison(
    comparison: &ComparisonSpec,
    counts: &BTreeMap<i64, u64>,
) -> Result<ComparisonUEstimate, StitchError> {
    let observed_pairs: u64 = counts
        .iter()
        .filter(|(vector_value, _)| **vector_value != NULL_VECTOR_VALUE)
        .map(|(_, count)| *count)
        .sum();
    if observed_pairs == 0 {
        return Err(execution_error(format!(
            "no admissible pairs observed for comparison `{}`",
            comparison.column
        )));
    }

    let levels = comparison
        .levels
        .iter()
        .map(|level| {
            let pair_count = counts.get(&level.vector_value).copied().unwrap_or(0);
            LevelUEstimate {
                vector_value: level.vector_value,
                label: level.label.clone(),
                pair_count,
                u_probability: pair_count as f64 / observed_pairs as f64,
            }
        })
        .collect();

    Ok(ComparisonUEstimate {
        column: comparison.column.clone(),
        observed_pairs,
        levels,
    })
}
