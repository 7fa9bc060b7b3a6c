use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::analysis::presence::PresenceMatrix;
use crate::analysis::suggest::{SuggestionThresholds, suggest_for_building};
use crate::model::ObservationRecord;

fn open_temp() -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::open(&db_path(dir.path())).expect("open store");
    (dir, store)
}

fn run(stage: &str) -> StageRunRow {
    StageRunRow::new(stage, &format!("{stage}-20260101T000000Z"), Path::new("manifest.json"))
}

fn reference_records() -> Vec<ObservationRecord> {
    vec![
        ObservationRecord::new("R1", "Boiler").with_key("100.10"),
        ObservationRecord::new("R1", "Pump"),
        ObservationRecord::new("R1", "Meter"),
        ObservationRecord::new("R2", "Boiler"),
        ObservationRecord::new("R2", "Meter"),
        ObservationRecord::new("R3", "Pump"),
        ObservationRecord::new("R3", "Sensor"),
        ObservationRecord::new("R3", "Meter"),
    ]
}

#[test]
fn reloaded_reference_context_reproduces_suggestions() {
    let (_dir, mut store) = open_temp();
    let matrix = PresenceMatrix::from_observations(&reference_records());
    let original = ReferenceContext {
        frequency: FrequencyTable::from_matrix(&matrix),
        correlation: CorrelationMatrix::from_matrix(&matrix),
        article_keys: BTreeMap::from([("Boiler".to_string(), "100.10".to_string())]),
    };
    assert!(
        original.correlation.get("Meter", "Meter").unwrap().is_nan(),
        "constant column"
    );

    store
        .replace_reference(
            &original.frequency,
            &original.correlation,
            &original.article_keys,
            &run("reference"),
        )
        .unwrap();
    let reloaded = store.load_reference_context().unwrap();

    assert_eq!(reloaded.frequency, original.frequency);
    assert_eq!(reloaded.article_keys, original.article_keys);
    assert!(reloaded.correlation.get("Meter", "Pump").unwrap().is_nan());
    assert_eq!(reloaded.correlation.labels(), original.correlation.labels());

    let thresholds = SuggestionThresholds {
        frequency_percent: 30.0,
        correlation: 0.1,
        max_correlation_suggestions: None,
    };
    for present in [vec!["Pump"], vec!["Boiler"], vec!["Sensor", "Meter"], vec![]] {
        let present = present
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        assert_eq!(
            suggest_for_building("C1", &present, &reloaded, &thresholds),
            suggest_for_building("C1", &present, &original, &thresholds),
        );
    }
}

#[test]
fn missing_stage_artifacts_name_the_producing_stage() {
    let (_dir, store) = open_temp();

    let err = store.load_reference_context().err().expect("reference missing");
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::MissingArtifact { producer, .. }) => assert_eq!(producer, "reference"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.load_groups().is_err());
    assert!(store.load_catalog_mappings().is_err());
    assert!(store.load_article_assignments().is_err());
    assert!(store.load_component_suggestions().unwrap().is_none());
}

#[test]
fn replacing_an_artifact_drops_the_previous_run() {
    let (_dir, mut store) = open_temp();
    let first = vec![
        SimilarityGroup {
            representative_index: 0,
            duplicate_indices: vec![1, 2],
        },
        SimilarityGroup {
            representative_index: 3,
            duplicate_indices: vec![],
        },
    ];
    let stats = GroupingStats::from_groups(&first, 4, 0.97);
    store.replace_groups(&first, &stats, &run("dedup")).unwrap();

    let second = vec![SimilarityGroup {
        representative_index: 0,
        duplicate_indices: vec![],
    }];
    let second_stats = GroupingStats::from_groups(&second, 1, 0.9);
    store
        .replace_groups(&second, &second_stats, &run("dedup"))
        .unwrap();

    let (groups, stats) = store.load_groups().unwrap();
    assert_eq!(groups, second);
    assert_eq!(stats, second_stats);
    assert_eq!(store.table_count("similarity_groups").unwrap(), 1);
    assert_eq!(store.stage_runs().unwrap().len(), 1);
}

#[test]
fn suggestion_stage_artifacts_round_trip() {
    let (_dir, mut store) = open_temp();

    let component = vec![Suggestion {
        building_id: "B1".to_string(),
        installation_label: "Pump".to_string(),
        probability: 0.9,
        reason: SuggestionReason::Component,
        rationale: "belongs to system: Heating".to_string(),
        article_key: Some("402".to_string()),
    }];
    store
        .replace_component_suggestions(&component, &run("components"))
        .unwrap();
    assert_eq!(store.load_component_suggestions().unwrap(), Some(component.clone()));

    let mappings = vec![
        InstallationMapping {
            source_label: "hot water pump".to_string(),
            canonical_label: Some("Pump".to_string()),
            similarity_score: 0.81,
            mapped: true,
            failure: None,
        },
        InstallationMapping {
            source_label: "broken".to_string(),
            canonical_label: None,
            similarity_score: 0.0,
            mapped: false,
            failure: Some("batch 0: timeout".to_string()),
        },
    ];
    let merged = vec![
        MergedSuggestion::from(component[0].clone()),
        MergedSuggestion {
            building_id: "B2".to_string(),
            installation_label: "Boiler".to_string(),
            probability: 2.0 / 3.0,
            reason: SuggestionReason::Frequency,
            rationale: "present in 66.7% of reference buildings (2/3)".to_string(),
            article_key: None,
        },
    ];
    store
        .replace_suggestions(&mappings, &merged, &run("suggest"))
        .unwrap();

    assert_eq!(store.load_installation_mappings().unwrap(), mappings);
    assert_eq!(store.load_merged_suggestions().unwrap(), merged);
}

#[test]
fn catalog_mappings_keep_nan_scores_and_methods() {
    let (_dir, mut store) = open_temp();
    let mappings = vec![
        CatalogMapping {
            representative_index: 0,
            heading_key: Some("01.01.".to_string()),
            score: 0.93,
            method: CatalogMethod::Embedding,
            failure: None,
        },
        CatalogMapping {
            representative_index: 5,
            heading_key: None,
            score: f64::NAN,
            method: CatalogMethod::None,
            failure: Some("batch 1: unavailable".to_string()),
        },
    ];
    store
        .replace_catalog_mappings(&mappings, &run("catalog"))
        .unwrap();

    let loaded = store.load_catalog_mappings().unwrap();
    assert_eq!(loaded[0], mappings[0]);
    assert!(loaded[1].score.is_nan());
    assert_eq!(loaded[1].failure, mappings[1].failure);
}

#[test]
fn article_assignments_round_trip_in_row_order() {
    let (_dir, mut store) = open_temp();
    let assignments = vec![
        ArticleAssignment {
            row_index: 4,
            representative_index: 1,
            heading_key: Some("01.".to_string()),
            article_number: None,
            status: ArticleStatus::Rejected,
            failure: Some("keyword answered 'K-50'".to_string()),
        },
        ArticleAssignment {
            row_index: 0,
            representative_index: 0,
            heading_key: Some("02.".to_string()),
            article_number: Some("K-50".to_string()),
            status: ArticleStatus::Assigned,
            failure: None,
        },
    ];
    store
        .replace_article_assignments(&assignments, &run("articles"))
        .unwrap();

    let loaded = store.load_article_assignments().unwrap();
    assert_eq!(loaded, vec![assignments[1].clone(), assignments[0].clone()]);
    assert_eq!(store.table_count("article_assignments").unwrap(), 2);
}

#[test]
fn unknown_tables_are_refused() {
    let (_dir, store) = open_temp();
    assert!(store.table_count("sqlite_master; DROP TABLE x").is_err());
    assert_eq!(store.table_count("merged_suggestions").unwrap(), 0);
}
