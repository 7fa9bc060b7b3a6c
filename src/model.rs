use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub building_id: String,
    pub raw_label: String,
    pub association_key: Option<String>,
}

impl ObservationRecord {
    pub fn new(building_id: &str, raw_label: &str) -> Self {
        Self {
            building_id: building_id.to_string(),
            raw_label: raw_label.to_string(),
            association_key: None,
        }
    }

    pub fn with_key(mut self, association_key: &str) -> Self {
        self.association_key = Some(association_key.to_string());
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionReason {
    Frequency,
    Correlation,
    Component,
}

impl SuggestionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Correlation => "correlation",
            Self::Component => "component",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "frequency" => Some(Self::Frequency),
            "correlation" => Some(Self::Correlation),
            "component" => Some(Self::Component),
            _ => None,
        }
    }
}

impl fmt::Display for SuggestionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub building_id: String,
    pub installation_label: String,
    pub probability: f64,
    pub reason: SuggestionReason,
    pub rationale: String,
    pub article_key: Option<String>,
}

impl Suggestion {
    /// Article key usable for cross-source dedup; blank keys count as absent.
    pub fn dedup_key(&self) -> Option<&str> {
        self.article_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Final suggestion row. The merge priority stays internal to the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSuggestion {
    pub building_id: String,
    pub installation_label: String,
    pub probability: f64,
    pub reason: SuggestionReason,
    pub rationale: String,
    pub article_key: Option<String>,
}

impl From<Suggestion> for MergedSuggestion {
    fn from(value: Suggestion) -> Self {
        Self {
            building_id: value.building_id,
            installation_label: value.installation_label,
            probability: value.probability,
            reason: value.reason,
            rationale: value.rationale,
            article_key: value.article_key,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFingerprint {
    pub path: String,
    pub sha256: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRunManifest<C: Serialize> {
    pub manifest_version: u32,
    pub run_id: String,
    pub stage: String,
    pub started_at: String,
    pub completed_at: String,
    pub status: String,
    pub db_path: String,
    pub inputs: Vec<InputFingerprint>,
    pub parameters: serde_json::Value,
    pub counts: C,
    pub warnings: Vec<String>,
}
