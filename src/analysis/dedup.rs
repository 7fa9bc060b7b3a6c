//! Greedy threshold clustering over a precomputed similarity matrix.
//!
//! Items are visited in ascending index order. The first unclaimed item
//! becomes a representative and claims every still-unclaimed item whose
//! similarity to it reaches the threshold. Claims are not transitive: an item
//! similar only to a claimed duplicate starts its own group. The result is
//! order dependent but reproducible for a fixed input order.

use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;
use crate::semantic::SimilarityMatrix;
use crate::util::percent_of;

pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.97;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityGroup {
    pub representative_index: usize,
    pub duplicate_indices: Vec<usize>,
}

impl SimilarityGroup {
    pub fn is_singleton(&self) -> bool {
        self.duplicate_indices.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.representative_index).chain(self.duplicate_indices.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingStats {
    pub total_entries: usize,
    pub representative_entries: usize,
    pub singleton_groups: usize,
    pub reduction_percent: f64,
    pub threshold: f64,
}

impl GroupingStats {
    pub fn from_groups(groups: &[SimilarityGroup], total_entries: usize, threshold: f64) -> Self {
        let representative_entries = groups.len();
        Self {
            total_entries,
            representative_entries,
            singleton_groups: groups.iter().filter(|group| group.is_singleton()).count(),
            reduction_percent: if total_entries == 0 {
                0.0
            } else {
                100.0 - percent_of(representative_entries, total_entries)
            },
            threshold,
        }
    }
}

/// Fails when any self-similarity entry is not exactly zero.
pub fn check_zero_diagonal(matrix: &SimilarityMatrix) -> Result<(), AnalysisError> {
    for index in 0..matrix.rows().min(matrix.cols()) {
        let value = matrix.get(index, index);
        if value != 0.0 {
            return Err(AnalysisError::DiagonalIntegrity { index, value });
        }
    }
    Ok(())
}

/// Partitions `0..N` into groups; see the module docs for the ordering rules.
pub fn group_similar(
    matrix: &SimilarityMatrix,
    threshold: f64,
) -> Result<Vec<SimilarityGroup>, AnalysisError> {
    if !matrix.is_square() {
        return Err(AnalysisError::shape(
            "deduplication similarity matrix",
            "a square matrix",
            format!("{}x{}", matrix.rows(), matrix.cols()),
        ));
    }
    check_zero_diagonal(matrix)?;

    let size = matrix.rows();
    let mut processed = vec![false; size];
    let mut groups = Vec::new();

    for representative in 0..size {
        if processed[representative] {
            continue;
        }
        processed[representative] = true;

        let row = matrix.row(representative);
        let mut duplicates = Vec::new();
        for (candidate, score) in row.iter().enumerate() {
            if candidate == representative || processed[candidate] {
                continue;
            }
            if *score >= threshold {
                duplicates.push(candidate);
            }
        }
        for duplicate in &duplicates {
            processed[*duplicate] = true;
        }

        groups.push(SimilarityGroup {
            representative_index: representative,
            duplicate_indices: duplicates,
        });
    }

    Ok(groups)
}
