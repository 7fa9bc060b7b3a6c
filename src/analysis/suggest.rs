use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::errors::AnalysisError;
use crate::model::{Suggestion, SuggestionReason};

use super::correlation::CorrelationMatrix;
use super::frequency::FrequencyTable;
use super::mapping::MappingTable;
use super::presence::PresenceMatrix;

pub const DEFAULT_FREQUENCY_THRESHOLD: f64 = 50.0;
pub const DEFAULT_CORRELATION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_CORRELATION_SUGGESTIONS: usize = 10;

/// Reference statistics shared read-only by every building analysis.
#[derive(Debug, Clone, Default)]
pub struct ReferenceContext {
    pub frequency: FrequencyTable,
    pub correlation: CorrelationMatrix,
    /// Reference label -> external article key.
    pub article_keys: BTreeMap<String, String>,
}

impl ReferenceContext {
    pub fn article_key(&self, label: &str) -> Option<String> {
        self.article_keys.get(label).cloned()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SuggestionThresholds {
    pub frequency_percent: f64,
    pub correlation: f64,
    pub max_correlation_suggestions: Option<usize>,
}

impl Default for SuggestionThresholds {
    fn default() -> Self {
        Self {
            frequency_percent: DEFAULT_FREQUENCY_THRESHOLD,
            correlation: DEFAULT_CORRELATION_THRESHOLD,
            max_correlation_suggestions: Some(DEFAULT_MAX_CORRELATION_SUGGESTIONS),
        }
    }
}

impl SuggestionThresholds {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(0.0..=100.0).contains(&self.frequency_percent) {
            return Err(AnalysisError::InvalidThreshold {
                name: "frequency_percent",
                value: self.frequency_percent,
                reason: "must lie in [0, 100]",
            });
        }
        if !(self.correlation > 0.0 && self.correlation <= 1.0) {
            return Err(AnalysisError::InvalidThreshold {
                name: "correlation",
                value: self.correlation,
                reason: "must lie in (0, 1]",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingSuggestions {
    pub building_id: String,
    pub existing_installations: Vec<String>,
    pub mapped_installations: Vec<String>,
    pub suggestions: Vec<Suggestion>,
}

struct CorrelatedCandidate<'a> {
    installation: &'a str,
    correlated_with: &'a str,
    correlation: f64,
}

/// Candidate missing installations for one building, highest probability
/// first. Frequency and correlation candidates for the same label are both
/// kept.
pub fn suggest_for_building(
    building_id: &str,
    present: &BTreeSet<String>,
    context: &ReferenceContext,
    thresholds: &SuggestionThresholds,
) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    for entry in context.frequency.at_or_above(thresholds.frequency_percent) {
        if present.contains(&entry.installation_label) {
            continue;
        }
        suggestions.push(Suggestion {
            building_id: building_id.to_string(),
            installation_label: entry.installation_label.clone(),
            probability: entry.prevalence(),
            reason: SuggestionReason::Frequency,
            rationale: format!(
                "present in {:.1}% of reference buildings ({}/{})",
                entry.percent, entry.buildings_with_it, entry.total_buildings
            ),
            article_key: context.article_key(&entry.installation_label),
        });
    }

    for candidate in correlated_candidates(present, &context.correlation, thresholds) {
        suggestions.push(Suggestion {
            building_id: building_id.to_string(),
            installation_label: candidate.installation.to_string(),
            probability: candidate.correlation,
            reason: SuggestionReason::Correlation,
            rationale: format!(
                "correlates ({:.2}) with {}",
                candidate.correlation, candidate.correlated_with
            ),
            article_key: context.article_key(candidate.installation),
        });
    }

    // Stable: ties keep frequency-before-correlation input order.
    suggestions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    suggestions
}

fn correlated_candidates<'a>(
    present: &'a BTreeSet<String>,
    correlation: &'a CorrelationMatrix,
    thresholds: &SuggestionThresholds,
) -> Vec<CorrelatedCandidate<'a>> {
    let mut candidates = Vec::<CorrelatedCandidate<'a>>::new();
    let mut slot_of = HashMap::<&str, usize>::new();

    for existing in present {
        let existing = existing.as_str();
        for (other, value) in correlation.row_signals(existing) {
            if other == existing || present.contains(other) {
                continue;
            }
            if value < thresholds.correlation {
                continue;
            }
            match slot_of.get(other) {
                Some(slot) => {
                    let current = &mut candidates[*slot];
                    if value > current.correlation {
                        current.correlation = value;
                        current.correlated_with = existing;
                    }
                }
                None => {
                    slot_of.insert(other, candidates.len());
                    candidates.push(CorrelatedCandidate {
                        installation: other,
                        correlated_with: existing,
                        correlation: value,
                    });
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    if let Some(limit) = thresholds.max_correlation_suggestions {
        candidates.truncate(limit);
    }
    candidates
}

/// Runs the engine for every building of a customer matrix, translating raw
/// labels through `mappings` first. Unmapped labels contribute nothing.
pub fn suggest_all(
    customer: &PresenceMatrix,
    mappings: &MappingTable,
    context: &ReferenceContext,
    thresholds: &SuggestionThresholds,
) -> Vec<BuildingSuggestions> {
    customer
        .buildings()
        .iter()
        .enumerate()
        .map(|(index, building_id)| {
            let existing = customer.present_labels(index);
            let mapped = existing
                .iter()
                .filter_map(|label| mappings.canonical_for(label))
                .map(str::to_string)
                .collect::<BTreeSet<String>>();
            let suggestions = suggest_for_building(building_id, &mapped, context, thresholds);
            BuildingSuggestions {
                building_id: building_id.clone(),
                existing_installations: existing.into_iter().map(str::to_string).collect(),
                mapped_installations: mapped.into_iter().collect(),
                suggestions,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuggestionSummary {
    pub total_buildings: usize,
    pub total_suggestions: usize,
    pub frequency_suggestions: usize,
    pub correlation_suggestions: usize,
    pub component_suggestions: usize,
    pub total_mapped_installations: usize,
    pub avg_suggestions_per_building: f64,
    pub avg_mapped_installations_per_building: f64,
}

impl SuggestionSummary {
    pub fn from_results(results: &[BuildingSuggestions]) -> Self {
        let mut summary = Self {
            total_buildings: results.len(),
            ..Self::default()
        };

        for building in results {
            summary.total_suggestions += building.suggestions.len();
            summary.total_mapped_installations += building.mapped_installations.len();
            for suggestion in &building.suggestions {
                match suggestion.reason {
                    SuggestionReason::Frequency => summary.frequency_suggestions += 1,
                    SuggestionReason::Correlation => summary.correlation_suggestions += 1,
                    SuggestionReason::Component => summary.component_suggestions += 1,
                }
            }
        }

        if summary.total_buildings > 0 {
            let buildings = summary.total_buildings as f64;
            summary.avg_suggestions_per_building = summary.total_suggestions as f64 / buildings;
            summary.avg_mapped_installations_per_building =
                summary.total_mapped_installations as f64 / buildings;
        }
        summary
    }
}
