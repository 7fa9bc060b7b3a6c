use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::analysis::catalog::{FallbackCounts, apply_categorizer, map_to_headings};
use crate::analysis::categorize::KeywordCategorizer;
use crate::cli::{CatalogArgs, CategorizerMode};
use crate::commands::stage::{StageContext, enforce_complete};
use crate::errors::AnalysisError;
use crate::input::{catalog_headings, catalog_required, cell_text, load_rows, row_description};
use crate::semantic::SimilarityMatrix;

#[derive(Debug, Serialize)]
struct CatalogCounts {
    representatives: usize,
    headings: usize,
    mapped_by_embedding: usize,
    fallback: FallbackCounts,
    unmapped: usize,
    failures: usize,
}

pub fn run(args: CatalogArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.threshold) {
        return Err(AnalysisError::InvalidThreshold {
            name: "threshold",
            value: args.threshold,
            reason: "must lie in [0, 1]",
        }
        .into());
    }

    let mut context = StageContext::start("catalog", &args.cache_root, args.schema_config.as_deref())?;
    let customer_schema = context.schema.customer.clone();
    let catalog_schema = context.schema.catalog.clone();

    let mut store = context.open_store()?;
    let (groups, _) = store.load_groups()?;

    let customer = load_rows(&args.customer, "customer", &[customer_schema.building_id.as_str()])?;
    context.track_input(&customer);
    let catalog = load_rows(&args.catalog, "catalog", &catalog_required(&catalog_schema))?;
    context.track_input(&catalog);

    let representatives = groups
        .iter()
        .map(|group| group.representative_index)
        .collect::<Vec<_>>();
    if let Some(out_of_range) = representatives
        .iter()
        .find(|index| **index >= customer.rows.len())
    {
        return Err(AnalysisError::MalformedInput {
            input: "customer".to_string(),
            reason: format!(
                "stored group representative {out_of_range} is beyond the {} input rows; rerun `assetcheck dedup`",
                customer.rows.len()
            ),
        }
        .into());
    }

    let (headings, skipped) = catalog_headings(&catalog.rows, &catalog_schema);
    skipped.log("catalog");
    info!(
        representatives = representatives.len(),
        headings = headings.len(),
        "mapping representatives onto catalog headings"
    );
    if headings.is_empty() {
        context.warn(format!(
            "catalog contains no heading rows with kind prefix '{}'",
            catalog_schema.heading_prefix
        ));
    }

    let heading_texts = headings
        .iter()
        .map(|heading| heading.text.clone())
        .collect::<Vec<_>>();
    let heading_vectors = context.embed(&args.embedding, "catalog heading", &heading_texts);

    let mut failures = HashMap::<usize, String>::new();
    let mut field_similarities = Vec::with_capacity(customer_schema.catalog_fields.len());
    for field in &customer_schema.catalog_fields {
        let texts = representatives
            .iter()
            .map(|index| cell_text(&customer.rows[*index], field))
            .collect::<Vec<_>>();
        let embedded = context.embed_sparse(&args.embedding, field, &texts);
        for position in embedded.failed {
            failures
                .entry(representatives[position])
                .or_insert_with(|| format!("field '{field}' could not be embedded"));
        }
        field_similarities.push(SimilarityMatrix::cross(&embedded.vectors, &heading_vectors.vectors));
    }

    let mut mappings = map_to_headings(
        &representatives,
        &headings,
        &field_similarities,
        args.threshold,
        &failures,
    )?;
    let mapped_by_embedding = mappings.iter().filter(|mapping| mapping.is_mapped()).count();

    let fallback = match args.categorizer {
        CategorizerMode::Off => FallbackCounts::default(),
        CategorizerMode::Local => {
            let categorizer = KeywordCategorizer::new(args.min_overlap)?;
            let texts = representatives
                .iter()
                .map(|index| {
                    (
                        *index,
                        row_description(
                            &customer.rows[*index],
                            &customer_schema.description_exclude_fields,
                            " | ",
                        ),
                    )
                })
                .collect::<HashMap<_, _>>();
            apply_categorizer(&mut mappings, &texts, &headings, &categorizer)
        }
    };
    info!(
        categorizer = args.categorizer.as_str(),
        attempted = fallback.attempted,
        matched = fallback.matched,
        rejected = fallback.rejected,
        failed = fallback.failed,
        "categorizer fallback finished"
    );

    let failed = mappings
        .iter()
        .filter(|mapping| mapping.failure.is_some())
        .count();
    if failed > 0 {
        context.warn(format!("{failed} representatives carry a failure marker"));
    }
    enforce_complete(args.require_complete, "catalog mappings", failed)
        .context("catalog stage incomplete")?;

    store.replace_catalog_mappings(&mappings, &context.run_row())?;

    let counts = CatalogCounts {
        representatives: representatives.len(),
        headings: headings.len(),
        mapped_by_embedding,
        unmapped: mappings.iter().filter(|mapping| !mapping.is_mapped()).count(),
        fallback,
        failures: failed,
    };
    info!(
        mapped_by_embedding = counts.mapped_by_embedding,
        unmapped = counts.unmapped,
        "stored catalog mappings"
    );
    context.finish(
        &serde_json::json!({
            "threshold": args.threshold,
            "categorizer": args.categorizer.as_str(),
            "min_overlap": args.min_overlap,
            "model_id": args.embedding.model_id,
            "dimensions": args.embedding.dimensions,
            "batch_size": args.embedding.batch_size,
        }),
        counts,
    )?;

    info!("catalog stage completed");
    Ok(())
}
