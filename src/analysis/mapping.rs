use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;
use crate::semantic::SimilarityMatrix;

pub const DEFAULT_MAPPING_THRESHOLD: f64 = 0.7;
pub const DEFAULT_CATALOG_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationMapping {
    pub source_label: String,
    pub canonical_label: Option<String>,
    /// Best score found, kept for unmapped labels too.
    pub similarity_score: f64,
    pub mapped: bool,
    pub failure: Option<String>,
}

/// First maximum of `scores`, NaN entries skipped.
pub fn best_match(scores: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, score) in scores.iter().copied().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Best match over several score rows for the same item, e.g. one row per
/// text field. Earlier rows win ties.
pub fn best_match_across<'a>(rows: impl IntoIterator<Item = &'a [f64]>) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for row in rows {
        let Some((index, score)) = best_match(row) else {
            continue;
        };
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Maps each source label onto the canonical vocabulary.
///
/// `similarity` holds one row per source label and one column per canonical
/// label. Labels listed in `failures` keep `mapped = false` and carry the
/// failure marker.
pub fn map_installations(
    sources: &[String],
    canonical: &[String],
    similarity: &SimilarityMatrix,
    threshold: f64,
    failures: &HashMap<usize, String>,
) -> Result<Vec<InstallationMapping>, AnalysisError> {
    if similarity.rows() != sources.len() || similarity.cols() != canonical.len() {
        return Err(AnalysisError::shape(
            "installation similarity matrix",
            format!("{}x{}", sources.len(), canonical.len()),
            format!("{}x{}", similarity.rows(), similarity.cols()),
        ));
    }

    let mappings = sources
        .iter()
        .enumerate()
        .map(|(row, source_label)| {
            let best = if canonical.is_empty() {
                None
            } else {
                best_match(similarity.row(row))
            };
            let similarity_score = best.map(|(_, score)| score).unwrap_or(0.0);
            let mapped = best.is_some() && similarity_score >= threshold;
            InstallationMapping {
                source_label: source_label.clone(),
                canonical_label: if mapped {
                    best.map(|(index, _)| canonical[index].clone())
                } else {
                    None
                },
                similarity_score,
                mapped,
                failure: failures.get(&row).cloned(),
            }
        })
        .collect();

    Ok(mappings)
}

/// Lookup over mapping results keyed by source label.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mappings: Vec<InstallationMapping>,
    index: HashMap<String, usize>,
}

impl MappingTable {
    pub fn new(mappings: Vec<InstallationMapping>) -> Self {
        let index = mappings
            .iter()
            .enumerate()
            .map(|(position, mapping)| (mapping.source_label.clone(), position))
            .collect();
        Self { mappings, index }
    }

    pub fn get(&self, source_label: &str) -> Option<&InstallationMapping> {
        self.index
            .get(source_label)
            .map(|position| &self.mappings[*position])
    }

    /// Canonical label for a mapped source label.
    pub fn canonical_for(&self, source_label: &str) -> Option<&str> {
        self.get(source_label)
            .filter(|mapping| mapping.mapped)
            .and_then(|mapping| mapping.canonical_label.as_deref())
    }

    pub fn mappings(&self) -> &[InstallationMapping] {
        &self.mappings
    }

    pub fn mapped_count(&self) -> usize {
        self.mappings.iter().filter(|mapping| mapping.mapped).count()
    }

    pub fn failed_count(&self) -> usize {
        self.mappings
            .iter()
            .filter(|mapping| mapping.failure.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn mapped_iff_best_score_reaches_threshold() {
        let sources = labels(&["heating boiler", "lift", "exact"]);
        let canonical = labels(&["Boiler", "Elevator"]);
        let similarity = SimilarityMatrix::from_rows(vec![
            vec![0.82, 0.10],
            vec![0.30, 0.65],
            vec![0.70, 0.20],
        ])
        .unwrap();

        let mappings =
            map_installations(&sources, &canonical, &similarity, 0.7, &HashMap::new()).unwrap();

        assert!(mappings[0].mapped);
        assert_eq!(mappings[0].canonical_label.as_deref(), Some("Boiler"));

        assert!(!mappings[1].mapped);
        assert_eq!(mappings[1].canonical_label, None);
        assert!((mappings[1].similarity_score - 0.65).abs() < 1e-12);

        assert!(mappings[2].mapped, "threshold is inclusive");

        for mapping in &mappings {
            assert_eq!(mapping.mapped, mapping.similarity_score >= 0.7);
        }
    }

    #[test]
    fn ties_resolve_to_first_candidate() {
        assert_eq!(best_match(&[0.4, 0.9, 0.9]), Some((1, 0.9)));
        assert_eq!(best_match(&[f64::NAN, 0.2]), Some((1, 0.2)));
        assert_eq!(best_match(&[f64::NAN]), None);
        assert_eq!(best_match(&[]), None);
    }

    #[test]
    fn best_match_across_prefers_earlier_rows_on_ties() {
        let first = [0.5, 0.8];
        let second = [0.8, 0.1];
        let third = [0.9, 0.1];
        assert_eq!(
            best_match_across([&first[..], &second[..]]),
            Some((1, 0.8))
        );
        assert_eq!(
            best_match_across([&first[..], &second[..], &third[..]]),
            Some((0, 0.9))
        );
    }

    #[test]
    fn empty_candidate_list_maps_nothing_with_zero_score() {
        let sources = labels(&["anything"]);
        let similarity = SimilarityMatrix::from_rows(vec![Vec::new()]).unwrap();
        let mappings =
            map_installations(&sources, &[], &similarity, 0.0, &HashMap::new()).unwrap();

        assert_eq!(mappings.len(), 1);
        assert!(!mappings[0].mapped);
        assert_eq!(mappings[0].similarity_score, 0.0);
    }

    #[test]
    fn failed_embeddings_are_marked_and_unmapped() {
        let sources = labels(&["broken"]);
        let canonical = labels(&["Boiler"]);
        let similarity = SimilarityMatrix::from_rows(vec![vec![f64::NAN]]).unwrap();
        let failures = HashMap::from([(0, "batch 0: timeout".to_string())]);

        let table = MappingTable::new(
            map_installations(&sources, &canonical, &similarity, 0.5, &failures).unwrap(),
        );

        let mapping = table.get("broken").unwrap();
        assert!(!mapping.mapped);
        assert_eq!(mapping.failure.as_deref(), Some("batch 0: timeout"));
        assert_eq!(table.failed_count(), 1);
        assert_eq!(table.canonical_for("broken"), None);
    }

    #[test]
    fn shape_mismatch_is_an_integrity_error() {
        let similarity = SimilarityMatrix::from_rows(vec![vec![0.5]]).unwrap();
        let result = map_installations(
            &labels(&["a", "b"]),
            &labels(&["x"]),
            &similarity,
            0.5,
            &HashMap::new(),
        );
        assert!(matches!(result, Err(AnalysisError::ShapeMismatch { .. })));
    }
}
