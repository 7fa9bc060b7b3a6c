use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;
use crate::semantic::SimilarityMatrix;

use super::categorize::{CatalogEntry, CategorizationOutcome, Categorizer, categorize};
use super::mapping::best_match_across;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogMethod {
    Embedding,
    Categorizer,
    None,
}

impl CatalogMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Categorizer => "categorizer",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "embedding" => Some(Self::Embedding),
            "categorizer" => Some(Self::Categorizer),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMapping {
    pub representative_index: usize,
    pub heading_key: Option<String>,
    pub score: f64,
    pub method: CatalogMethod,
    pub failure: Option<String>,
}

impl CatalogMapping {
    pub fn is_mapped(&self) -> bool {
        self.heading_key.is_some()
    }
}

/// Matches representatives against catalog headings.
///
/// `field_similarities` holds one matrix per text field, each with one row
/// per entry of `representatives` and one column per heading. The best score
/// over all fields wins; earlier fields win ties.
pub fn map_to_headings(
    representatives: &[usize],
    headings: &[CatalogEntry],
    field_similarities: &[SimilarityMatrix],
    threshold: f64,
    failures: &HashMap<usize, String>,
) -> Result<Vec<CatalogMapping>, AnalysisError> {
    for matrix in field_similarities {
        if matrix.rows() != representatives.len() || matrix.cols() != headings.len() {
            return Err(AnalysisError::shape(
                "catalog similarity matrix",
                format!("{}x{}", representatives.len(), headings.len()),
                format!("{}x{}", matrix.rows(), matrix.cols()),
            ));
        }
    }

    let mappings = representatives
        .iter()
        .enumerate()
        .map(|(row, representative_index)| {
            let best = best_match_across(field_similarities.iter().map(|matrix| matrix.row(row)));
            let score = best.map(|(_, score)| score).unwrap_or(0.0);
            let heading_key = best
                .filter(|(_, score)| *score >= threshold)
                .map(|(column, _)| headings[column].key.clone());
            CatalogMapping {
                representative_index: *representative_index,
                method: if heading_key.is_some() {
                    CatalogMethod::Embedding
                } else {
                    CatalogMethod::None
                },
                heading_key,
                score,
                failure: failures.get(representative_index).cloned(),
            }
        })
        .collect();

    Ok(mappings)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackCounts {
    pub attempted: usize,
    pub matched: usize,
    pub no_match: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Offers every unmapped entry to `categorizer`. `texts` is keyed by
/// representative index. Rejected and failed answers leave the entry
/// unmapped with a failure marker.
pub fn apply_categorizer(
    mappings: &mut [CatalogMapping],
    texts: &HashMap<usize, String>,
    headings: &[CatalogEntry],
    categorizer: &dyn Categorizer,
) -> FallbackCounts {
    let mut counts = FallbackCounts::default();

    for mapping in mappings.iter_mut().filter(|mapping| !mapping.is_mapped()) {
        let Some(text) = texts
            .get(&mapping.representative_index)
            .filter(|text| !text.trim().is_empty())
        else {
            continue;
        };
        counts.attempted += 1;

        match categorize(categorizer, text, headings) {
            CategorizationOutcome::Matched(key) => {
                counts.matched += 1;
                mapping.heading_key = Some(key);
                mapping.method = CatalogMethod::Categorizer;
            }
            CategorizationOutcome::NoMatch => counts.no_match += 1,
            CategorizationOutcome::Rejected(answer) => {
                counts.rejected += 1;
                mapping.failure = Some(format!(
                    "{} answered unknown key '{answer}'",
                    categorizer.name()
                ));
            }
            CategorizationOutcome::Failed(reason) => {
                counts.failed += 1;
                mapping.failure = Some(reason);
            }
        }
    }

    counts
}
