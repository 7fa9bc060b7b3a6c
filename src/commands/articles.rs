use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::analysis::articles::{ArticleCounts, assign_articles};
use crate::analysis::categorize::KeywordCategorizer;
use crate::cli::ArticlesArgs;
use crate::commands::stage::{StageContext, enforce_complete};
use crate::errors::AnalysisError;
use crate::input::{catalog_article_groups, catalog_required, load_rows, row_description, with_assigned_articles};
use crate::util::write_json_pretty;

#[derive(Debug, Serialize)]
struct ArticlesStageCounts {
    customer_rows: usize,
    headings_with_articles: usize,
    articles: usize,
    skipped_articles: usize,
    assigned_rows: usize,
    #[serde(flatten)]
    outcomes: ArticleCounts,
}

pub fn run(args: ArticlesArgs) -> Result<()> {
    let mut context = StageContext::start("articles", &args.cache_root, args.schema_config.as_deref())?;
    let customer_schema = context.schema.customer.clone();
    let catalog_schema = context.schema.catalog.clone();

    let mut store = context.open_store()?;
    let (groups, _) = store.load_groups()?;
    let mappings = store.load_catalog_mappings()?;

    let customer = load_rows(&args.customer, "customer", &[customer_schema.building_id.as_str()])?;
    context.track_input(&customer);
    let catalog = load_rows(&args.catalog, "catalog", &catalog_required(&catalog_schema))?;
    context.track_input(&catalog);

    if let Some(out_of_range) = groups
        .iter()
        .flat_map(|group| group.members())
        .find(|index| *index >= customer.rows.len())
    {
        return Err(AnalysisError::MalformedInput {
            input: "customer".to_string(),
            reason: format!(
                "stored group member {out_of_range} is beyond the {} input rows; rerun `assetcheck dedup`",
                customer.rows.len()
            ),
        }
        .into());
    }

    let (articles, skipped) = catalog_article_groups(&catalog.rows, &catalog_schema);
    skipped.log("catalog");
    let article_total = articles.values().map(Vec::len).sum::<usize>();
    if article_total == 0 {
        context.warn(format!(
            "catalog lists no articles with a '{}' value under any heading",
            catalog_schema.article_number
        ));
    }

    let texts = groups
        .iter()
        .map(|group| {
            let index = group.representative_index;
            (
                index,
                row_description(
                    &customer.rows[index],
                    &customer_schema.description_exclude_fields,
                    " | ",
                ),
            )
        })
        .collect::<HashMap<_, _>>();
    info!(
        representatives = groups.len(),
        headings = articles.len(),
        articles = article_total,
        "assigning article numbers within heading groups"
    );

    let categorizer = KeywordCategorizer::new(args.min_overlap)?;
    let (assignments, outcomes) = assign_articles(&groups, &mappings, &texts, &articles, &categorizer);

    if outcomes.failures() > 0 {
        context.warn(format!(
            "{} representatives got a rejected answer or a categorizer failure",
            outcomes.failures()
        ));
    }
    enforce_complete(args.require_complete, "article assignments", outcomes.failures())
        .context("articles stage incomplete")?;

    store.replace_article_assignments(&assignments, &context.run_row())?;

    let assigned_rows = assignments
        .iter()
        .filter(|assignment| assignment.article_number.is_some())
        .count();
    info!(
        assigned = outcomes.assigned,
        no_match = outcomes.no_match,
        assigned_rows,
        "stored article assignments"
    );

    if let Some(path) = &args.output {
        let annotated = with_assigned_articles(
            &customer.rows,
            &assignments,
            &customer_schema.assigned_article_field,
        );
        write_json_pretty(path, &annotated)?;
        info!(path = %path.display(), rows = annotated.len(), "wrote annotated customer rows");
    }

    let counts = ArticlesStageCounts {
        customer_rows: customer.rows.len(),
        headings_with_articles: articles.values().filter(|group| !group.is_empty()).count(),
        articles: article_total,
        skipped_articles: skipped.count,
        assigned_rows,
        outcomes,
    };
    context.finish(
        &serde_json::json!({
            "categorizer": "keyword",
            "min_overlap": args.min_overlap,
            "output": args.output.as_ref().map(|path| path.display().to_string()),
        }),
        counts,
    )?;

    info!("articles stage completed");
    Ok(())
}
