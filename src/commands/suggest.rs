use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::mapping::{MappingTable, map_installations};
use crate::analysis::merge::merge_suggestions;
use crate::analysis::presence::PresenceMatrix;
use crate::analysis::suggest::{SuggestionSummary, SuggestionThresholds, suggest_all};
use crate::cli::SuggestArgs;
use crate::commands::stage::{StageContext, enforce_complete};
use crate::errors::AnalysisError;
use crate::input::{customer_observations, customer_required, load_rows};
use crate::model::{MergedSuggestion, SuggestionReason};
use crate::semantic::SimilarityMatrix;
use crate::util::write_json_pretty;

#[derive(Debug, Serialize)]
struct SuggestCounts {
    customer_records: usize,
    skipped_rows: usize,
    customer_labels: usize,
    mapped_labels: usize,
    mapping_failures: usize,
    component_suggestions: Option<usize>,
    merged_suggestions: usize,
    merged_component_suggestions: usize,
    summary: SuggestionSummary,
}

#[derive(Debug, Serialize)]
struct SuggestionExport<'a> {
    run_id: &'a str,
    generated_at: String,
    suggestions: &'a [MergedSuggestion],
}

pub fn run(args: SuggestArgs) -> Result<()> {
    let thresholds = SuggestionThresholds {
        frequency_percent: args.frequency_threshold,
        correlation: args.correlation_threshold,
        max_correlation_suggestions: (args.max_correlation_suggestions > 0)
            .then_some(args.max_correlation_suggestions),
    };
    thresholds.validate()?;
    if !(0.0..=1.0).contains(&args.mapping_threshold) {
        return Err(AnalysisError::InvalidThreshold {
            name: "mapping_threshold",
            value: args.mapping_threshold,
            reason: "must lie in [0, 1]",
        }
        .into());
    }

    let mut context = StageContext::start("suggest", &args.cache_root, args.schema_config.as_deref())?;
    let schema = context.schema.customer.clone();

    let mut store = context.open_store()?;
    let reference = store.load_reference_context()?;
    info!(
        installations = reference.frequency.len(),
        article_keys = reference.article_keys.len(),
        "loaded reference statistics"
    );

    let loaded = load_rows(&args.customer, "customer", &customer_required(&schema))?;
    context.track_input(&loaded);
    let (records, skipped) = customer_observations(&loaded.rows, &schema);
    skipped.log("customer");
    let customer = PresenceMatrix::from_observations(&records);

    let sources = customer.labels().to_vec();
    let canonical = reference
        .frequency
        .labels()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let source_vectors = context.embed(&args.embedding, "customer installation", &sources);
    let canonical_vectors = context.embed(&args.embedding, "reference installation", &canonical);
    let failures = source_vectors
        .vectors
        .iter()
        .enumerate()
        .filter(|(_, vector)| vector.is_none())
        .map(|(row, _)| (row, "embedding failed".to_string()))
        .collect::<HashMap<_, _>>();

    let similarity = SimilarityMatrix::cross(&source_vectors.vectors, &canonical_vectors.vectors);
    let mappings = MappingTable::new(map_installations(
        &sources,
        &canonical,
        &similarity,
        args.mapping_threshold,
        &failures,
    )?);
    info!(
        labels = mappings.len(),
        mapped = mappings.mapped_count(),
        failed = mappings.failed_count(),
        "mapped customer installations onto reference vocabulary"
    );
    enforce_complete(args.require_complete, "installation embeddings", mappings.failed_count())
        .context("suggest stage incomplete")?;

    let per_building = suggest_all(&customer, &mappings, &reference, &thresholds);
    for building in &per_building {
        debug!(
            building_id = %building.building_id,
            existing = building.existing_installations.len(),
            mapped = building.mapped_installations.len(),
            suggestions = building.suggestions.len(),
            "building analysed"
        );
    }
    let summary = SuggestionSummary::from_results(&per_building);

    let component = store.load_component_suggestions()?;
    if component.is_none() {
        context.warn(
            "components stage has not run; merging statistical suggestions only".to_string(),
        );
    }
    let statistical = per_building
        .iter()
        .flat_map(|building| building.suggestions.iter().cloned())
        .collect::<Vec<_>>();
    let merged = merge_suggestions(&statistical, component.as_deref().unwrap_or_default());

    store.replace_suggestions(mappings.mappings(), &merged, &context.run_row())?;
    info!(
        buildings = summary.total_buildings,
        statistical = statistical.len(),
        merged = merged.len(),
        avg_per_building = %format!("{:.1}", summary.avg_suggestions_per_building),
        "stored merged suggestions"
    );

    if let Some(path) = &args.export_json {
        write_json_pretty(
            path,
            &SuggestionExport {
                run_id: &context.run_id,
                generated_at: crate::util::now_utc_string(),
                suggestions: &merged,
            },
        )?;
        info!(path = %path.display(), "exported merged suggestions");
    }

    let counts = SuggestCounts {
        customer_records: records.len(),
        skipped_rows: skipped.count,
        customer_labels: sources.len(),
        mapped_labels: mappings.mapped_count(),
        mapping_failures: mappings.failed_count(),
        component_suggestions: component.as_ref().map(Vec::len),
        merged_suggestions: merged.len(),
        merged_component_suggestions: merged
            .iter()
            .filter(|suggestion| suggestion.reason == SuggestionReason::Component)
            .count(),
        summary,
    };
    context.finish(
        &serde_json::json!({
            "thresholds": thresholds,
            "mapping_threshold": args.mapping_threshold,
            "model_id": args.embedding.model_id,
            "dimensions": args.embedding.dimensions,
            "batch_size": args.embedding.batch_size,
        }),
        counts,
    )?;

    info!("suggest stage completed");
    Ok(())
}
