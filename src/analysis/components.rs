use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{ObservationRecord, Suggestion, SuggestionReason};

pub const COMPONENT_PROBABILITY: f64 = 0.9;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    System,
    Component,
    Other,
}

impl AssetKind {
    /// Maps the raw kind column; matching is exact after trimming.
    pub fn classify(raw: &str, system_marker: &str, component_marker: &str) -> Self {
        let raw = raw.trim();
        if raw == system_marker {
            Self::System
        } else if raw == component_marker {
            Self::Component
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub label: String,
    pub kind: AssetKind,
    pub article_key: Option<String>,
    pub parent_asset_id: Option<String>,
}

impl AssetRecord {
    fn key(&self) -> Option<&str> {
        self.article_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub asset_id: String,
    pub label: String,
    pub article_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEntry {
    pub system_id: String,
    pub label: String,
    pub article_key: String,
    pub components: Vec<ComponentEntry>,
}

/// System article key -> the system and its keyed components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentHierarchy {
    systems: BTreeMap<String, SystemEntry>,
}

impl ComponentHierarchy {
    /// Only keyed systems with at least one keyed component are kept. A later
    /// system sharing an article key replaces the earlier one.
    pub fn build(assets: &[AssetRecord]) -> Self {
        let mut components_of = HashMap::<&str, Vec<ComponentEntry>>::new();
        for asset in assets {
            if asset.kind != AssetKind::Component {
                continue;
            }
            let (Some(key), Some(parent)) = (asset.key(), asset.parent_asset_id.as_deref()) else {
                continue;
            };
            components_of
                .entry(parent.trim())
                .or_default()
                .push(ComponentEntry {
                    asset_id: asset.asset_id.clone(),
                    label: asset.label.clone(),
                    article_key: key.to_string(),
                });
        }

        let mut systems = BTreeMap::new();
        for asset in assets {
            if asset.kind != AssetKind::System {
                continue;
            }
            let Some(key) = asset.key() else {
                continue;
            };
            let Some(components) = components_of.get(asset.asset_id.trim()) else {
                continue;
            };
            systems.insert(
                key.to_string(),
                SystemEntry {
                    system_id: asset.asset_id.clone(),
                    label: asset.label.clone(),
                    article_key: key.to_string(),
                    components: components.clone(),
                },
            );
        }

        Self { systems }
    }

    pub fn system(&self, article_key: &str) -> Option<&SystemEntry> {
        self.systems.get(article_key)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn component_count(&self) -> usize {
        self.systems
            .values()
            .map(|system| system.components.len())
            .sum()
    }
}

/// Component suggestions per customer building, keyed and ordered by
/// building id. Buildings without any suggestion are still listed.
pub fn find_missing_components(
    hierarchy: &ComponentHierarchy,
    customer: &[ObservationRecord],
) -> BTreeMap<String, Vec<Suggestion>> {
    let mut present_keys = BTreeMap::<&str, BTreeSet<&str>>::new();
    for record in customer {
        let keys = present_keys.entry(record.building_id.as_str()).or_default();
        if let Some(key) = record
            .association_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            keys.insert(key);
        }
    }

    present_keys
        .into_iter()
        .map(|(building_id, keys)| {
            let mut suggestions = Vec::new();
            for key in &keys {
                let Some(system) = hierarchy.system(key) else {
                    continue;
                };
                for component in &system.components {
                    if keys.contains(component.article_key.as_str()) {
                        continue;
                    }
                    suggestions.push(Suggestion {
                        building_id: building_id.to_string(),
                        installation_label: component.label.clone(),
                        probability: COMPONENT_PROBABILITY,
                        reason: SuggestionReason::Component,
                        rationale: format!("belongs to system: {}", system.label),
                        article_key: Some(component.article_key.clone()),
                    });
                }
            }
            (building_id.to_string(), suggestions)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(
        id: &str,
        label: &str,
        kind: AssetKind,
        key: Option<&str>,
        parent: Option<&str>,
    ) -> AssetRecord {
        AssetRecord {
            asset_id: id.to_string(),
            label: label.to_string(),
            kind,
            article_key: key.map(str::to_string),
            parent_asset_id: parent.map(str::to_string),
        }
    }

    fn reference_assets() -> Vec<AssetRecord> {
        vec![
            asset("S1", "Heating system", AssetKind::System, Some("400"), None),
            asset("C1", "Boiler", AssetKind::Component, Some("401"), Some("S1")),
            asset("C2", "Pump", AssetKind::Component, Some("402"), Some("S1")),
            asset("C3", "Unkeyed valve", AssetKind::Component, None, Some("S1")),
            asset("S2", "Lonely system", AssetKind::System, Some("500"), None),
            asset("S3", "Unkeyed system", AssetKind::System, None, None),
            asset("C4", "Orphan", AssetKind::Component, Some("601"), Some("S3")),
        ]
    }

    #[test]
    fn hierarchy_keeps_keyed_systems_with_keyed_components() {
        let hierarchy = ComponentHierarchy::build(&reference_assets());

        assert_eq!(hierarchy.len(), 1);
        let heating = hierarchy.system("400").expect("heating system kept");
        let keys = heating
            .components
            .iter()
            .map(|component| component.article_key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, ["401", "402"]);
        assert!(hierarchy.system("500").is_none());
        assert_eq!(hierarchy.component_count(), 2);
    }

    #[test]
    fn later_system_with_same_key_replaces_earlier() {
        let mut assets = reference_assets();
        assets.push(asset("S9", "Newer heating", AssetKind::System, Some("400"), None));
        assets.push(asset("C9", "Burner", AssetKind::Component, Some("409"), Some("S9")));

        let hierarchy = ComponentHierarchy::build(&assets);
        let heating = hierarchy.system("400").unwrap();
        assert_eq!(heating.system_id, "S9");
        assert_eq!(heating.components.len(), 1);
    }

    #[test]
    fn absent_components_of_present_systems_are_suggested() {
        let hierarchy = ComponentHierarchy::build(&reference_assets());
        let customer = vec![
            ObservationRecord::new("B1", "heating").with_key("400"),
            ObservationRecord::new("B1", "pump").with_key("402"),
            ObservationRecord::new("B2", "pump").with_key("402"),
            ObservationRecord::new("B3", "heating").with_key(" 400 "),
            ObservationRecord::new("B3", "boiler").with_key("401"),
            ObservationRecord::new("B3", "pump").with_key("402"),
        ];

        let results = find_missing_components(&hierarchy, &customer);

        assert_eq!(results.len(), 3);
        let b1 = &results["B1"];
        assert_eq!(b1.len(), 1);
        assert_eq!(b1[0].installation_label, "Boiler");
        assert_eq!(b1[0].article_key.as_deref(), Some("401"));
        assert_eq!(b1[0].reason, SuggestionReason::Component);
        assert_eq!(b1[0].probability, COMPONENT_PROBABILITY);
        assert_eq!(b1[0].rationale, "belongs to system: Heating system");

        assert!(results["B2"].is_empty(), "no system present");
        assert!(results["B3"].is_empty(), "complete system");
    }

    #[test]
    fn repeated_system_rows_suggest_once() {
        let hierarchy = ComponentHierarchy::build(&reference_assets());
        let customer = vec![
            ObservationRecord::new("B1", "heating a").with_key("400"),
            ObservationRecord::new("B1", "heating b").with_key("400"),
        ];

        let results = find_missing_components(&hierarchy, &customer);
        assert_eq!(results["B1"].len(), 2);
    }

    #[test]
    fn kind_markers_are_matched_exactly() {
        assert_eq!(AssetKind::classify(" Anlage ", "Anlage", "Bauteil"), AssetKind::System);
        assert_eq!(AssetKind::classify("Bauteil", "Anlage", "Bauteil"), AssetKind::Component);
        assert_eq!(AssetKind::classify("anlage", "Anlage", "Bauteil"), AssetKind::Other);
    }
}
