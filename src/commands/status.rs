use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store::{ARTIFACT_TABLES, ArtifactStore, db_path};

const STAGES: [&str; 6] = [
    "reference",
    "components",
    "dedup",
    "catalog",
    "articles",
    "suggest",
];

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = db_path(&args.cache_root);
    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "artifact store missing; run `assetcheck reference` first");
        return Ok(());
    }

    let store = ArtifactStore::open(&db_path)?;
    let runs = store.stage_runs()?;
    let ran = |stage: &str| runs.iter().any(|run| run.stage == stage);
    for stage in STAGES {
        match runs.iter().find(|run| run.stage == stage) {
            Some(run) => {
                let manifest_exists = std::path::Path::new(&run.manifest_path).exists();
                info!(
                    stage,
                    run_id = %run.run_id,
                    completed_at = %run.completed_at,
                    manifest = %run.manifest_path,
                    manifest_exists,
                    "stage artifacts present"
                );
                if !manifest_exists {
                    warn!(stage, manifest = %run.manifest_path, "run manifest missing");
                }
            }
            None => warn!(stage, "stage has not run"),
        }
    }

    for table in ARTIFACT_TABLES {
        info!(table = *table, rows = store.table_count(table)?, "artifact table");
    }

    if ran("dedup") {
        let (_, stats) = store.load_groups()?;
        info!(
            total_entries = stats.total_entries,
            representatives = stats.representative_entries,
            reduction_percent = %format!("{:.1}", stats.reduction_percent),
            "similarity grouping"
        );
    }
    if ran("catalog") {
        let mappings = store.load_catalog_mappings()?;
        info!(
            representatives = mappings.len(),
            mapped = mappings.iter().filter(|mapping| mapping.is_mapped()).count(),
            failures = mappings.iter().filter(|mapping| mapping.failure.is_some()).count(),
            "catalog mappings"
        );
    }
    if ran("articles") {
        let assignments = store.load_article_assignments()?;
        info!(
            rows = assignments.len(),
            assigned = assignments
                .iter()
                .filter(|assignment| assignment.article_number.is_some())
                .count(),
            failures = assignments
                .iter()
                .filter(|assignment| assignment.failure.is_some())
                .count(),
            "article assignments"
        );
    }
    if ran("suggest") {
        let mappings = store.load_installation_mappings()?;
        let merged = store.load_merged_suggestions()?;
        let buildings = merged
            .iter()
            .map(|suggestion| suggestion.building_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        info!(
            customer_labels = mappings.len(),
            mapped = mappings.iter().filter(|mapping| mapping.mapped).count(),
            suggestions = merged.len(),
            buildings,
            "merged suggestions"
        );
    }

    Ok(())
}
