use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::components::{ComponentHierarchy, find_missing_components};
use crate::cli::ComponentsArgs;
use crate::commands::stage::StageContext;
use crate::input::{
    asset_required, customer_observations, customer_required, load_rows, reference_assets,
};

#[derive(Debug, Serialize)]
struct ComponentCounts {
    assets: usize,
    systems_with_components: usize,
    hierarchy_components: usize,
    customer_records: usize,
    customer_records_with_key: usize,
    buildings: usize,
    buildings_with_suggestions: usize,
    suggestions: usize,
}

pub fn run(args: ComponentsArgs) -> Result<()> {
    let mut context =
        StageContext::start("components", &args.cache_root, args.schema_config.as_deref())?;
    let reference_schema = context.schema.reference.clone();
    let customer_schema = context.schema.customer.clone();

    let assets_rows = load_rows(&args.assets, "assets", &asset_required(&reference_schema))?;
    context.track_input(&assets_rows);
    let (assets, skipped_assets) = reference_assets(&assets_rows.rows, &reference_schema);
    skipped_assets.log("assets");

    let customer_rows = load_rows(&args.customer, "customer", &customer_required(&customer_schema))?;
    context.track_input(&customer_rows);
    let (customer, skipped_customer) = customer_observations(&customer_rows.rows, &customer_schema);
    skipped_customer.log("customer");

    let hierarchy = ComponentHierarchy::build(&assets);
    info!(
        systems = hierarchy.len(),
        components = hierarchy.component_count(),
        "component hierarchy built"
    );
    if hierarchy.is_empty() {
        context.warn("no keyed system with keyed components found in asset input".to_string());
    }

    let per_building = find_missing_components(&hierarchy, &customer);
    for (building_id, suggestions) in &per_building {
        debug!(building_id = %building_id, suggestions = suggestions.len(), "component analysis");
    }

    let suggestions = per_building.values().flatten().cloned().collect::<Vec<_>>();
    let mut store = context.open_store()?;
    store.replace_component_suggestions(&suggestions, &context.run_row())?;
    info!(
        buildings = per_building.len(),
        suggestions = suggestions.len(),
        "stored component suggestions"
    );

    let counts = ComponentCounts {
        assets: assets.len(),
        systems_with_components: hierarchy.len(),
        hierarchy_components: hierarchy.component_count(),
        customer_records: customer.len(),
        customer_records_with_key: customer
            .iter()
            .filter(|record| record.association_key.is_some())
            .count(),
        buildings: per_building.len(),
        buildings_with_suggestions: per_building
            .values()
            .filter(|suggestions| !suggestions.is_empty())
            .count(),
        suggestions: suggestions.len(),
    };
    context.finish(&serde_json::json!({}), counts)?;

    info!("components stage completed");
    Ok(())
}
