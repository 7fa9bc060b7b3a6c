use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::model::ObservationRecord;

const LOAD_EXTREMES: usize = 10;

/// Boolean building x installation table.
///
/// Rows and columns are sorted ascending so the same observations always
/// produce the same matrix regardless of record order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceMatrix {
    buildings: Vec<String>,
    labels: Vec<String>,
    cells: Vec<Vec<bool>>,
}

impl PresenceMatrix {
    pub fn from_observations(records: &[ObservationRecord]) -> Self {
        let mut grouped = BTreeMap::<&str, BTreeSet<&str>>::new();
        let mut labels = BTreeSet::<&str>::new();

        for record in records {
            grouped
                .entry(record.building_id.as_str())
                .or_default()
                .insert(record.raw_label.as_str());
            labels.insert(record.raw_label.as_str());
        }

        let labels = labels.into_iter().map(str::to_string).collect::<Vec<_>>();
        let column_of = labels
            .iter()
            .enumerate()
            .map(|(index, label)| (label.as_str(), index))
            .collect::<HashMap<&str, usize>>();

        let mut buildings = Vec::with_capacity(grouped.len());
        let mut cells = Vec::with_capacity(grouped.len());
        for (building, present) in grouped {
            let mut row = vec![false; labels.len()];
            for label in present {
                row[column_of[label]] = true;
            }
            buildings.push(building.to_string());
            cells.push(row);
        }

        Self {
            buildings,
            labels,
            cells,
        }
    }

    pub fn buildings(&self) -> &[String] {
        &self.buildings
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty() || self.labels.is_empty()
    }

    /// Labels present in the building at `building_index`, ascending.
    pub fn present_labels(&self, building_index: usize) -> Vec<&str> {
        self.cells[building_index]
            .iter()
            .zip(&self.labels)
            .filter(|(present, _)| **present)
            .map(|(_, label)| label.as_str())
            .collect()
    }

    /// Number of buildings in which the label at `label_index` is present.
    pub fn column_count(&self, label_index: usize) -> usize {
        self.cells.iter().filter(|row| row[label_index]).count()
    }

    /// Number of buildings in which both labels are present.
    pub fn co_occurrence(&self, left: usize, right: usize) -> usize {
        self.cells
            .iter()
            .filter(|row| row[left] && row[right])
            .count()
    }

    pub fn row_count(&self, building_index: usize) -> usize {
        self.cells[building_index]
            .iter()
            .filter(|present| **present)
            .count()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildingLoad {
    pub building_id: String,
    pub installations: usize,
}

/// Distribution of installation counts across buildings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildingLoadSummary {
    pub buildings: usize,
    pub mean_installations: f64,
    pub median_installations: f64,
    pub most_equipped: Vec<BuildingLoad>,
    pub least_equipped: Vec<BuildingLoad>,
}

impl BuildingLoadSummary {
    pub fn from_matrix(matrix: &PresenceMatrix) -> Self {
        let loads = matrix
            .buildings()
            .iter()
            .enumerate()
            .map(|(index, building)| BuildingLoad {
                building_id: building.clone(),
                installations: matrix.row_count(index),
            })
            .collect::<Vec<_>>();

        if loads.is_empty() {
            return Self {
                buildings: 0,
                mean_installations: 0.0,
                median_installations: 0.0,
                most_equipped: Vec::new(),
                least_equipped: Vec::new(),
            };
        }

        let total = loads.iter().map(|load| load.installations).sum::<usize>();
        let mut counts = loads
            .iter()
            .map(|load| load.installations)
            .collect::<Vec<_>>();
        counts.sort_unstable();
        let middle = counts.len() / 2;
        let median = if counts.len() % 2 == 0 {
            (counts[middle - 1] + counts[middle]) as f64 / 2.0
        } else {
            counts[middle] as f64
        };

        let mut most = loads.clone();
        most.sort_by(|a, b| {
            b.installations
                .cmp(&a.installations)
                .then_with(|| a.building_id.cmp(&b.building_id))
        });
        most.truncate(LOAD_EXTREMES);

        let mut least = loads.clone();
        least.sort_by(|a, b| {
            a.installations
                .cmp(&b.installations)
                .then_with(|| a.building_id.cmp(&b.building_id))
        });
        least.truncate(LOAD_EXTREMES);

        Self {
            buildings: loads.len(),
            mean_installations: total as f64 / loads.len() as f64,
            median_installations: median,
            most_equipped: most,
            least_equipped: least,
        }
    }
}
