use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::analysis::dedup::{GroupingStats, group_similar};
use crate::cli::DedupArgs;
use crate::commands::stage::StageContext;
use crate::errors::AnalysisError;
use crate::input::{load_rows, row_description};
use crate::semantic::SimilarityMatrix;

#[derive(Debug, Serialize)]
struct DedupCounts {
    records: usize,
    embedding_failures: usize,
    stats: GroupingStats,
    largest_group: usize,
}

pub fn run(args: DedupArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.threshold) {
        return Err(AnalysisError::InvalidThreshold {
            name: "threshold",
            value: args.threshold,
            reason: "must lie in [0, 1]",
        }
        .into());
    }

    let mut context = StageContext::start("dedup", &args.cache_root, args.schema_config.as_deref())?;
    let schema = context.schema.customer.clone();

    let loaded = load_rows(&args.customer, "customer", &[schema.building_id.as_str()])?;
    context.track_input(&loaded);
    let texts = loaded
        .rows
        .iter()
        .map(|row| row_description(row, &schema.description_exclude_fields, " "))
        .collect::<Vec<_>>();

    let embedded = context.embed(&args.embedding, "customer record", &texts);
    let similarity = SimilarityMatrix::self_similarity(&embedded.vectors);
    let groups = group_similar(&similarity, args.threshold)?;
    let stats = GroupingStats::from_groups(&groups, texts.len(), args.threshold);

    info!(
        total_entries = stats.total_entries,
        representatives = stats.representative_entries,
        singletons = stats.singleton_groups,
        reduction_percent = %format!("{:.1}", stats.reduction_percent),
        "grouped similar customer records"
    );

    let mut store = context.open_store()?;
    store.replace_groups(&groups, &stats, &context.run_row())?;

    let counts = DedupCounts {
        records: texts.len(),
        embedding_failures: embedded.failed_count(),
        largest_group: groups
            .iter()
            .map(|group| group.duplicate_indices.len() + 1)
            .max()
            .unwrap_or(0),
        stats,
    };
    context.finish(
        &serde_json::json!({
            "threshold": args.threshold,
            "model_id": args.embedding.model_id,
            "dimensions": args.embedding.dimensions,
            "batch_size": args.embedding.batch_size,
        }),
        counts,
    )?;

    info!("dedup stage completed");
    Ok(())
}
