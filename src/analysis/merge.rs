use std::collections::{BTreeMap, HashMap};

use crate::model::{MergedSuggestion, Suggestion, SuggestionReason};

/// Merge priority; a lower number always wins a key collision.
fn priority(suggestion: &Suggestion) -> u8 {
    match suggestion.reason {
        SuggestionReason::Component => 1,
        SuggestionReason::Frequency | SuggestionReason::Correlation => 2,
    }
}

/// Combines component-hierarchy suggestions with the statistical ones.
///
/// Within each building, suggestions sharing a non-blank article key collapse
/// to the one with the better priority (first seen on a tie). Keyless
/// suggestions always survive. Output is ordered by building ascending, then
/// probability descending.
pub fn merge_suggestions(
    statistical: &[Suggestion],
    component: &[Suggestion],
) -> Vec<MergedSuggestion> {
    let mut per_building = BTreeMap::<&str, Vec<&Suggestion>>::new();
    for suggestion in component.iter().chain(statistical) {
        per_building
            .entry(suggestion.building_id.as_str())
            .or_default()
            .push(suggestion);
    }

    let mut merged = Vec::new();
    for candidates in per_building.into_values() {
        let mut kept = Vec::<&Suggestion>::with_capacity(candidates.len());
        let mut slot_of = HashMap::<&str, usize>::new();

        for candidate in candidates {
            let Some(key) = candidate.dedup_key() else {
                kept.push(candidate);
                continue;
            };
            match slot_of.get(key) {
                Some(slot) => {
                    if priority(candidate) < priority(kept[*slot]) {
                        kept[*slot] = candidate;
                    }
                }
                None => {
                    slot_of.insert(key, kept.len());
                    kept.push(candidate);
                }
            }
        }

        merged.extend(kept.into_iter().cloned().map(MergedSuggestion::from));
    }

    merged.sort_by(|a, b| {
        a.building_id
            .cmp(&b.building_id)
            .then_with(|| b.probability.total_cmp(&a.probability))
    });
    merged
}
