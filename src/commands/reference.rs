use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::analysis::correlation::CorrelationMatrix;
use crate::analysis::frequency::FrequencyTable;
use crate::analysis::presence::{BuildingLoadSummary, PresenceMatrix};
use crate::cli::ReferenceArgs;
use crate::commands::stage::StageContext;
use crate::input::{article_keys, load_rows, reference_observations, reference_required};

#[derive(Debug, Serialize)]
struct ReferenceCounts {
    observations: usize,
    skipped_rows: usize,
    buildings: usize,
    installations: usize,
    article_keys: usize,
    degenerate_installations: usize,
    categories: Vec<(String, usize)>,
    building_load: BuildingLoadSummary,
}

pub fn run(args: ReferenceArgs) -> Result<()> {
    let mut context = StageContext::start("reference", &args.cache_root, args.schema_config.as_deref())?;
    let schema = context.schema.reference.clone();

    let loaded = load_rows(&args.observations, "reference", &reference_required(&schema))?;
    context.track_input(&loaded);
    let (records, skipped) = reference_observations(&loaded.rows, &schema);
    skipped.log("reference");

    let matrix = PresenceMatrix::from_observations(&records);
    if matrix.is_empty() {
        context.warn("reference input produced an empty presence matrix".to_string());
    }
    let frequency = FrequencyTable::from_matrix(&matrix);
    let correlation = CorrelationMatrix::from_matrix(&matrix);
    let keys = article_keys(&records);
    let building_load = BuildingLoadSummary::from_matrix(&matrix);

    let degenerate = correlation.degenerate_labels();
    if !degenerate.is_empty() {
        context.warn(format!(
            "{} installations have zero variance across buildings; their correlations are undefined (first: {})",
            degenerate.len(),
            degenerate
                .iter()
                .take(5)
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    info!(
        buildings = matrix.building_count(),
        installations = matrix.label_count(),
        mean_installations = building_load.mean_installations,
        median_installations = building_load.median_installations,
        "reference presence matrix built"
    );
    for (category, count) in frequency.category_counts() {
        info!(category = %category, installations = count, "frequency category");
    }

    let mut store = context.open_store()?;
    store.replace_reference(&frequency, &correlation, &keys, &context.run_row())?;
    info!(
        path = %store.path().display(),
        frequency_entries = frequency.len(),
        article_keys = keys.len(),
        "stored reference statistics"
    );

    let counts = ReferenceCounts {
        observations: records.len(),
        skipped_rows: skipped.count,
        buildings: matrix.building_count(),
        installations: matrix.label_count(),
        article_keys: keys.len(),
        degenerate_installations: degenerate.len(),
        categories: frequency
            .category_counts()
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect(),
        building_load,
    };
    context.finish(&serde_json::json!({}), counts)?;

    info!("reference stage completed");
    Ok(())
}
