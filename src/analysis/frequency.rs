use std::fmt;

use serde::{Deserialize, Serialize};

use super::presence::PresenceMatrix;

/// Prevalence bucket. Bins are closed on the upper bound: [0,10], (10,25],
/// (25,50], (50,75], (75,100].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyCategory {
    VeryRare,
    Rare,
    Medium,
    Common,
    VeryCommon,
}

impl FrequencyCategory {
    pub fn from_percent(percent: f64) -> Self {
        if percent <= 10.0 {
            Self::VeryRare
        } else if percent <= 25.0 {
            Self::Rare
        } else if percent <= 50.0 {
            Self::Medium
        } else if percent <= 75.0 {
            Self::Common
        } else {
            Self::VeryCommon
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryRare => "very_rare",
            Self::Rare => "rare",
            Self::Medium => "medium",
            Self::Common => "common",
            Self::VeryCommon => "very_common",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "very_rare" => Some(Self::VeryRare),
            "rare" => Some(Self::Rare),
            "medium" => Some(Self::Medium),
            "common" => Some(Self::Common),
            "very_common" => Some(Self::VeryCommon),
            _ => None,
        }
    }

    pub fn display_label(self) -> &'static str {
        match self {
            Self::VeryRare => "very rare (0-10%)",
            Self::Rare => "rare (10-25%)",
            Self::Medium => "medium (25-50%)",
            Self::Common => "common (50-75%)",
            Self::VeryCommon => "very common (75-100%)",
        }
    }
}

impl fmt::Display for FrequencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub installation_label: String,
    pub buildings_with_it: usize,
    pub total_buildings: usize,
    pub percent: f64,
    pub category: FrequencyCategory,
}

impl FrequencyEntry {
    pub fn prevalence(&self) -> f64 {
        self.percent / 100.0
    }
}

/// Per-installation prevalence, ordered by percent descending then label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyTable {
    entries: Vec<FrequencyEntry>,
}

impl FrequencyTable {
    pub fn from_matrix(matrix: &PresenceMatrix) -> Self {
        let total_buildings = matrix.building_count();
        if total_buildings == 0 {
            return Self::default();
        }

        let entries = matrix
            .labels()
            .iter()
            .enumerate()
            .map(|(label_index, label)| {
                let buildings_with_it = matrix.column_count(label_index);
                let percent = buildings_with_it as f64 / total_buildings as f64 * 100.0;
                FrequencyEntry {
                    installation_label: label.clone(),
                    buildings_with_it,
                    total_buildings,
                    percent,
                    category: FrequencyCategory::from_percent(percent),
                }
            })
            .collect();

        Self::from_entries(entries)
    }

    /// Rebuilds a table from stored entries, re-establishing the
    /// presentation order.
    pub fn from_entries(mut entries: Vec<FrequencyEntry>) -> Self {
        entries.sort_by(|a, b| {
            b.percent
                .total_cmp(&a.percent)
                .then_with(|| a.installation_label.cmp(&b.installation_label))
        });
        Self { entries }
    }

    pub fn entries(&self) -> &[FrequencyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|entry| entry.installation_label.as_str())
    }

    /// Entries at or above `threshold_percent`, in table order.
    pub fn at_or_above(&self, threshold_percent: f64) -> impl Iterator<Item = &FrequencyEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.percent >= threshold_percent)
    }

    pub fn category_counts(&self) -> Vec<(FrequencyCategory, usize)> {
        [
            FrequencyCategory::VeryRare,
            FrequencyCategory::Rare,
            FrequencyCategory::Medium,
            FrequencyCategory::Common,
            FrequencyCategory::VeryCommon,
        ]
        .into_iter()
        .map(|category| {
            let count = self
                .entries
                .iter()
                .filter(|entry| entry.category == category)
                .count();
            (category, count)
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObservationRecord;

    fn entry<'a>(table: &'a FrequencyTable, label: &str) -> &'a FrequencyEntry {
        table
            .entries()
            .iter()
            .find(|entry| entry.installation_label == label)
            .expect("entry present")
    }

    fn scenario_matrix() -> PresenceMatrix {
        PresenceMatrix::from_observations(&[
            ObservationRecord::new("B1", "Boiler"),
            ObservationRecord::new("B1", "Pump"),
            ObservationRecord::new("B2", "Boiler"),
            ObservationRecord::new("B3", "Pump"),
            ObservationRecord::new("B3", "Sensor"),
        ])
    }

    #[test]
    fn scenario_prevalence_matches_hand_computation() {
        let table = FrequencyTable::from_matrix(&scenario_matrix());

        let labels = table.labels().collect::<Vec<_>>();
        assert_eq!(labels, ["Boiler", "Pump", "Sensor"]);

        let boiler = entry(&table, "Boiler");
        assert_eq!(boiler.buildings_with_it, 2);
        assert_eq!(boiler.total_buildings, 3);
        assert!((boiler.percent - 66.666_666).abs() < 1e-4);
        assert_eq!(boiler.category, FrequencyCategory::Common);

        let sensor = entry(&table, "Sensor");
        assert!((sensor.percent - 33.333_333).abs() < 1e-4);
        assert_eq!(sensor.category, FrequencyCategory::Medium);
    }

    #[test]
    fn entries_stay_within_bounds() {
        let table = FrequencyTable::from_matrix(&scenario_matrix());
        for entry in table.entries() {
            assert!((0.0..=100.0).contains(&entry.percent));
            assert!(entry.buildings_with_it <= entry.total_buildings);
        }
    }

    #[test]
    fn empty_matrix_yields_empty_table() {
        let table = FrequencyTable::from_matrix(&PresenceMatrix::default());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn bucket_boundaries_are_upper_inclusive() {
        assert_eq!(FrequencyCategory::from_percent(0.0), FrequencyCategory::VeryRare);
        assert_eq!(FrequencyCategory::from_percent(10.0), FrequencyCategory::VeryRare);
        assert_eq!(FrequencyCategory::from_percent(10.01), FrequencyCategory::Rare);
        assert_eq!(FrequencyCategory::from_percent(25.0), FrequencyCategory::Rare);
        assert_eq!(FrequencyCategory::from_percent(50.0), FrequencyCategory::Medium);
        assert_eq!(FrequencyCategory::from_percent(50.5), FrequencyCategory::Common);
        assert_eq!(FrequencyCategory::from_percent(75.0), FrequencyCategory::Common);
        assert_eq!(FrequencyCategory::from_percent(100.0), FrequencyCategory::VeryCommon);
    }

    #[test]
    fn ties_are_ordered_by_label() {
        let table = FrequencyTable::from_matrix(&PresenceMatrix::from_observations(&[
            ObservationRecord::new("B1", "Zeta"),
            ObservationRecord::new("B1", "Alpha"),
            ObservationRecord::new("B2", "Mid"),
        ]));

        let labels = table.labels().collect::<Vec<_>>();
        assert_eq!(labels, ["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn threshold_filter_is_inclusive() {
        let table = FrequencyTable::from_matrix(&PresenceMatrix::from_observations(&[
            ObservationRecord::new("B1", "Half"),
            ObservationRecord::new("B2", "Other"),
        ]));
        let selected = table
            .at_or_above(50.0)
            .map(|entry| entry.installation_label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(selected, ["Half", "Other"]);
    }
}
