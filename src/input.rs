use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::analysis::articles::ArticleAssignment;
use crate::analysis::categorize::CatalogEntry;
use crate::analysis::components::{AssetKind, AssetRecord};
use crate::errors::AnalysisError;
use crate::model::{InputFingerprint, ObservationRecord};
use crate::util::sha256_file;

pub type Row = Map<String, Value>;

/// Field names of every tabular input. Missing sections in a schema-config
/// file fall back to these defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub reference: ReferenceSchema,
    pub customer: CustomerSchema,
    pub catalog: CatalogSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSchema {
    pub building_id: String,
    pub label: String,
    pub article_key: String,
    pub asset_id: String,
    pub kind: String,
    pub parent_asset_id: String,
    pub system_kind: String,
    pub component_kind: String,
}

impl Default for ReferenceSchema {
    fn default() -> Self {
        Self {
            building_id: "Gebäude-ID".to_string(),
            label: "AKS-Bezeichnung".to_string(),
            article_key: "Verbandsnummer".to_string(),
            asset_id: "Anlagen-ID".to_string(),
            kind: "Anlagentyp".to_string(),
            parent_asset_id: "Bauteil der Anlage".to_string(),
            system_kind: "Anlage".to_string(),
            component_kind: "Bauteil".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerSchema {
    pub building_id: String,
    /// Joined with a space to form the installation label.
    pub label_fields: Vec<String>,
    /// First non-blank field wins.
    pub article_key_fields: Vec<String>,
    /// Fields compared one by one against catalog headings.
    pub catalog_fields: Vec<String>,
    /// Left out of the free-text description used for deduplication.
    pub description_exclude_fields: Vec<String>,
    /// Leading column of the annotated rows written by the articles stage.
    pub assigned_article_field: String,
}

impl Default for CustomerSchema {
    fn default() -> Self {
        Self {
            building_id: "WirtEinh".to_string(),
            label_fields: strings(&["EQ-Klasse-Bezeichnung", "Anlagenausprägung"]),
            article_key_fields: strings(&["Verbandsnummer", "Artikelnummer"]),
            catalog_fields: strings(&[
                "Anlagenausprägung",
                "EQ-Klasse-Bezeichnung",
                "EQ-Bezeichnung",
            ]),
            description_exclude_fields: strings(&[
                "WirtEinh",
                "EQ_übergeordnet",
                "Equipment",
                "EQ-Klasse",
                "EQ-Menge",
            ]),
            assigned_article_field: "EP-Artikelnummer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSchema {
    pub key: String,
    pub text: String,
    pub kind: String,
    pub heading_prefix: String,
    pub article_number: String,
    /// Joined with ` | ` to describe an article to a categorizer.
    pub article_text_fields: Vec<String>,
}

impl Default for CatalogSchema {
    fn default() -> Self {
        Self {
            key: "OZ".to_string(),
            text: "Kurztext / Bezeichnung".to_string(),
            kind: "Art".to_string(),
            heading_prefix: "NG".to_string(),
            article_number: "Artikelnummer".to_string(),
            article_text_fields: strings(&[
                "Kurztext / Bezeichnung",
                "Bezeichnung",
                "Beschreibung",
                "Spezifikation",
                "Hersteller",
                "Artikelnummer",
            ]),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub fn load_schema_config(path: Option<&Path>) -> Result<SchemaConfig> {
    let Some(path) = path else {
        return Ok(SchemaConfig::default());
    };
    let config: SchemaConfig = crate::util::read_json(path)?;
    info!(path = %path.display(), "loaded schema config");
    Ok(config)
}

#[derive(Debug, Clone)]
pub struct LoadedRows {
    pub input: String,
    pub rows: Vec<Row>,
    pub fingerprint: InputFingerprint,
}

/// Reads a JSON array of objects and checks that every row carries each
/// `required` field. Null values are allowed here; the typed extractors
/// below count them as skips.
pub fn load_rows(path: &Path, input: &str, required: &[&str]) -> Result<LoadedRows> {
    let raw = fs::read(path).with_context(|| format!("failed to read {input} input {}", path.display()))?;
    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {input} input {}", path.display()))?;
    let rows = parse_rows(value, input, required)?;

    let fingerprint = InputFingerprint {
        path: path.display().to_string(),
        sha256: sha256_file(path)?,
        rows: rows.len(),
    };
    info!(input, path = %path.display(), rows = rows.len(), "loaded input rows");

    Ok(LoadedRows {
        input: input.to_string(),
        rows,
        fingerprint,
    })
}

fn parse_rows(value: Value, input: &str, required: &[&str]) -> Result<Vec<Row>, AnalysisError> {
    let Value::Array(items) = value else {
        return Err(AnalysisError::MalformedInput {
            input: input.to_string(),
            reason: "expected a JSON array of objects".to_string(),
        });
    };

    let mut rows = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(row) = item else {
            return Err(AnalysisError::MalformedInput {
                input: input.to_string(),
                reason: format!("row {index} is not an object"),
            });
        };
        if let Some(field) = required.iter().find(|field| !row.contains_key(**field)) {
            return Err(AnalysisError::MissingField {
                input: input.to_string(),
                field: field.to_string(),
                row: index,
            });
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Text of a cell; null, blank and nested values read as absent.
pub fn cell_text(row: &Row, field: &str) -> Option<String> {
    let text = match row.get(field)? {
        Value::String(value) => value.trim().to_string(),
        Value::Number(value) => value.to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Row indices dropped by a typed extractor for blank required values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkippedRows {
    pub count: usize,
    pub first_rows: Vec<usize>,
}

impl SkippedRows {
    fn record(&mut self, row: usize) {
        self.count += 1;
        if self.first_rows.len() < 10 {
            self.first_rows.push(row);
        }
    }

    pub fn log(&self, input: &str) {
        if self.count > 0 {
            warn!(
                input,
                skipped = self.count,
                first_rows = ?self.first_rows,
                "rows with blank required values skipped"
            );
        }
    }
}

pub fn reference_required(schema: &ReferenceSchema) -> Vec<&str> {
    vec![schema.building_id.as_str(), schema.label.as_str()]
}

pub fn reference_observations(
    rows: &[Row],
    schema: &ReferenceSchema,
) -> (Vec<ObservationRecord>, SkippedRows) {
    let mut skipped = SkippedRows::default();
    let mut records = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let (Some(building_id), Some(label)) = (
            cell_text(row, &schema.building_id),
            cell_text(row, &schema.label),
        ) else {
            skipped.record(index);
            continue;
        };
        let record = ObservationRecord::new(&building_id, &label);
        records.push(match cell_text(row, &schema.article_key) {
            Some(key) => record.with_key(&key),
            None => record,
        });
    }

    (records, skipped)
}

/// Label -> article key; a later row overrides an earlier one.
pub fn article_keys(records: &[ObservationRecord]) -> BTreeMap<String, String> {
    records
        .iter()
        .filter_map(|record| {
            record
                .association_key
                .as_ref()
                .map(|key| (record.raw_label.clone(), key.clone()))
        })
        .collect()
}

pub fn asset_required(schema: &ReferenceSchema) -> Vec<&str> {
    vec![
        schema.asset_id.as_str(),
        schema.label.as_str(),
        schema.kind.as_str(),
        schema.article_key.as_str(),
    ]
}

pub fn reference_assets(rows: &[Row], schema: &ReferenceSchema) -> (Vec<AssetRecord>, SkippedRows) {
    let mut skipped = SkippedRows::default();
    let mut assets = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let Some(asset_id) = cell_text(row, &schema.asset_id) else {
            skipped.record(index);
            continue;
        };
        let kind = cell_text(row, &schema.kind)
            .map(|raw| AssetKind::classify(&raw, &schema.system_kind, &schema.component_kind))
            .unwrap_or(AssetKind::Other);
        assets.push(AssetRecord {
            asset_id,
            label: cell_text(row, &schema.label).unwrap_or_default(),
            kind,
            article_key: cell_text(row, &schema.article_key),
            parent_asset_id: cell_text(row, &schema.parent_asset_id),
        });
    }

    (assets, skipped)
}

pub fn customer_required(schema: &CustomerSchema) -> Vec<&str> {
    std::iter::once(schema.building_id.as_str())
        .chain(schema.label_fields.iter().map(String::as_str))
        .collect()
}

fn customer_label(row: &Row, schema: &CustomerSchema) -> Option<String> {
    let parts = schema
        .label_fields
        .iter()
        .filter_map(|field| cell_text(row, field))
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn customer_article_key(row: &Row, schema: &CustomerSchema) -> Option<String> {
    schema
        .article_key_fields
        .iter()
        .find_map(|field| cell_text(row, field))
}

pub fn customer_observations(
    rows: &[Row],
    schema: &CustomerSchema,
) -> (Vec<ObservationRecord>, SkippedRows) {
    let mut skipped = SkippedRows::default();
    let mut records = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let (Some(building_id), Some(label)) = (
            cell_text(row, &schema.building_id),
            customer_label(row, schema),
        ) else {
            skipped.record(index);
            continue;
        };
        let record = ObservationRecord::new(&building_id, &label);
        records.push(match customer_article_key(row, schema) {
            Some(key) => record.with_key(&key),
            None => record,
        });
    }

    (records, skipped)
}

/// Every non-excluded string or number cell, in input column order.
pub fn row_description(row: &Row, exclude: &[String], separator: &str) -> String {
    row.iter()
        .filter(|(field, _)| !exclude.iter().any(|excluded| excluded == *field))
        .filter_map(|(field, _)| cell_text(row, field))
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn catalog_required(schema: &CatalogSchema) -> Vec<&str> {
    vec![schema.key.as_str(), schema.text.as_str(), schema.kind.as_str()]
}

fn is_heading_row(row: &Row, schema: &CatalogSchema) -> bool {
    cell_text(row, &schema.kind).is_some_and(|kind| kind.starts_with(schema.heading_prefix.as_str()))
}

/// Heading rows: kind starts with the configured prefix and key and text are
/// present.
pub fn catalog_headings(rows: &[Row], schema: &CatalogSchema) -> (Vec<CatalogEntry>, SkippedRows) {
    let mut skipped = SkippedRows::default();
    let mut headings = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        if !is_heading_row(row, schema) {
            continue;
        }
        let (Some(key), Some(text)) = (cell_text(row, &schema.key), cell_text(row, &schema.text))
        else {
            skipped.record(index);
            continue;
        };
        headings.push(CatalogEntry { key, text });
    }

    (headings, skipped)
}

/// Articles listed under each heading key, keyed by article number.
///
/// A group runs from its heading to the next heading row. Rows before the
/// first heading, or under a heading without a key, belong to no group.
/// Articles without a number are skipped.
pub fn catalog_article_groups(
    rows: &[Row],
    schema: &CatalogSchema,
) -> (BTreeMap<String, Vec<CatalogEntry>>, SkippedRows) {
    let mut skipped = SkippedRows::default();
    let mut groups: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (index, row) in rows.iter().enumerate() {
        if is_heading_row(row, schema) {
            current = cell_text(row, &schema.key);
            if let Some(key) = &current {
                groups.entry(key.clone()).or_default();
            }
            continue;
        }
        let Some(heading) = &current else {
            continue;
        };
        let Some(number) = cell_text(row, &schema.article_number) else {
            skipped.record(index);
            continue;
        };
        let text = schema
            .article_text_fields
            .iter()
            .filter_map(|field| cell_text(row, field))
            .collect::<Vec<_>>()
            .join(" | ");
        groups.entry(heading.clone()).or_default().push(CatalogEntry { key: number, text });
    }

    (groups, skipped)
}

/// Copies of `rows` with the assigned article number as the first column,
/// null where none was assigned.
pub fn with_assigned_articles(rows: &[Row], assignments: &[ArticleAssignment], field: &str) -> Vec<Row> {
    let assigned = assignments
        .iter()
        .filter_map(|assignment| {
            assignment
                .article_number
                .as_ref()
                .map(|number| (assignment.row_index, number.as_str()))
        })
        .collect::<HashMap<_, _>>();

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let mut annotated = Row::new();
            let value = assigned
                .get(&index)
                .map_or(Value::Null, |number| Value::String(number.to_string()));
            annotated.insert(field.to_string(), value);
            for (key, value) in row.iter().filter(|(key, _)| key.as_str() != field) {
                annotated.insert(key.clone(), value.clone());
            }
            annotated
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rows(value: Value) -> Vec<Row> {
        parse_rows(value, "test", &[]).expect("rows")
    }

    #[test]
    fn missing_required_field_names_input_field_and_row() {
        let value = json!([
            {"building": "B1", "label": "Boiler"},
            {"building": "B2"},
        ]);
        let err = parse_rows(value, "reference", &["building", "label"]).unwrap_err();
        match err {
            AnalysisError::MissingField { input, field, row } => {
                assert_eq!(input, "reference");
                assert_eq!(field, "label");
                assert_eq!(row, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_array_input_is_malformed() {
        let err = parse_rows(json!({"rows": []}), "customer", &[]).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { .. }));
    }

    #[test]
    fn blank_and_null_required_values_are_skipped_and_counted() {
        let schema = ReferenceSchema {
            building_id: "building".to_string(),
            label: "label".to_string(),
            article_key: "key".to_string(),
            ..ReferenceSchema::default()
        };
        let input = rows(json!([
            {"building": "B1", "label": "Boiler", "key": 100.5},
            {"building": null, "label": "Pump", "key": null},
            {"building": "B2", "label": "  ", "key": "7"},
            {"building": 3, "label": "Pump", "key": ""},
        ]));

        let (records, skipped) = reference_observations(&input, &schema);

        assert_eq!(
            records,
            vec![
                ObservationRecord::new("B1", "Boiler").with_key("100.5"),
                ObservationRecord::new("3", "Pump"),
            ]
        );
        assert_eq!(skipped.count, 2);
        assert_eq!(skipped.first_rows, vec![1, 2]);
    }

    #[test]
    fn article_keys_are_last_wins() {
        let records = vec![
            ObservationRecord::new("B1", "Boiler").with_key("1"),
            ObservationRecord::new("B2", "Boiler").with_key("2"),
            ObservationRecord::new("B2", "Pump"),
        ];
        let keys = article_keys(&records);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["Boiler"], "2");
    }

    #[test]
    fn customer_label_joins_configured_fields() {
        let schema = CustomerSchema {
            building_id: "unit".to_string(),
            label_fields: strings(&["class", "variant"]),
            article_key_fields: strings(&["assoc", "article"]),
            ..CustomerSchema::default()
        };
        let input = rows(json!([
            {"unit": "W1", "class": "Pump", "variant": "hot water", "assoc": null, "article": "55"},
            {"unit": "W1", "class": "Sensor", "variant": null},
            {"unit": "W2", "class": "", "variant": ""},
        ]));

        let (records, skipped) = customer_observations(&input, &schema);
        assert_eq!(
            records,
            vec![
                ObservationRecord::new("W1", "Pump hot water").with_key("55"),
                ObservationRecord::new("W1", "Sensor"),
            ]
        );
        assert_eq!(skipped.count, 1);
    }

    #[test]
    fn catalog_headings_filter_on_kind_prefix() {
        let schema = CatalogSchema::default();
        let input = rows(json!([
            {"OZ": "01.", "Kurztext / Bezeichnung": "Heating", "Art": "NG1"},
            {"OZ": "01.01.", "Kurztext / Bezeichnung": "Boiler 50kW", "Art": "Position"},
            {"OZ": "02.", "Kurztext / Bezeichnung": null, "Art": "NG2"},
            {"OZ": "03.", "Kurztext / Bezeichnung": "Ventilation", "Art": "NG1"},
        ]));

        let (headings, skipped) = catalog_headings(&input, &schema);
        let keys = headings.iter().map(|heading| heading.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["01.", "03."]);
        assert_eq!(skipped.count, 1);
    }

    #[test]
    fn article_groups_run_until_the_next_heading() {
        let schema = CatalogSchema::default();
        let input = rows(json!([
            {"OZ": "00.01.", "Kurztext / Bezeichnung": "Orphan", "Art": "Position", "Artikelnummer": "X-1"},
            {"OZ": "01.", "Kurztext / Bezeichnung": "Fire doors", "Art": "NG1"},
            {"OZ": "01.01.", "Kurztext / Bezeichnung": "Fire door T30", "Art": "Position", "Hersteller": "Acme", "Artikelnummer": "FD-30"},
            {"OZ": "01.02.", "Kurztext / Bezeichnung": "Fire door T90", "Art": "Position", "Artikelnummer": null},
            {"OZ": "02.", "Kurztext / Bezeichnung": "Boilers", "Art": "NG1"},
        ]));

        let (groups, skipped) = catalog_article_groups(&input, &schema);

        assert_eq!(groups.keys().collect::<Vec<_>>(), ["01.", "02."]);
        assert_eq!(
            groups["01."],
            vec![CatalogEntry {
                key: "FD-30".to_string(),
                text: "Fire door T30 | Acme | FD-30".to_string(),
            }]
        );
        assert!(groups["02."].is_empty());
        assert_eq!(skipped.first_rows, vec![3]);
    }

    #[test]
    fn assigned_article_leads_each_annotated_row() {
        use crate::analysis::articles::ArticleStatus;

        let input = rows(json!([
            {"WirtEinh": "W1", "EP-Artikelnummer": "stale", "Anlagenausprägung": "Door"},
            {"WirtEinh": "W2"},
        ]));
        let assignments = vec![ArticleAssignment {
            row_index: 0,
            representative_index: 0,
            heading_key: Some("01.".to_string()),
            article_number: Some("FD-30".to_string()),
            status: ArticleStatus::Assigned,
            failure: None,
        }];

        let annotated = with_assigned_articles(&input, &assignments, "EP-Artikelnummer");

        let columns = annotated[0].keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(columns, ["EP-Artikelnummer", "WirtEinh", "Anlagenausprägung"]);
        assert_eq!(annotated[0]["EP-Artikelnummer"], "FD-30");
        assert_eq!(annotated[1]["EP-Artikelnummer"], Value::Null);
        assert_eq!(annotated[1]["WirtEinh"], "W2");
    }

    #[test]
    fn assets_classify_kinds_and_keep_parents() {
        let schema = ReferenceSchema::default();
        let input = rows(json!([
            {"Anlagen-ID": "S1", "AKS-Bezeichnung": "Heating", "Anlagentyp": "Anlage", "Verbandsnummer": "400"},
            {"Anlagen-ID": "C1", "AKS-Bezeichnung": "Boiler", "Anlagentyp": "Bauteil", "Verbandsnummer": "401", "Bauteil der Anlage": "S1"},
            {"Anlagen-ID": null, "AKS-Bezeichnung": "Ghost", "Anlagentyp": "Bauteil", "Verbandsnummer": "9"},
        ]));

        let (assets, skipped) = reference_assets(&input, &schema);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].kind, AssetKind::System);
        assert_eq!(assets[1].kind, AssetKind::Component);
        assert_eq!(assets[1].parent_asset_id.as_deref(), Some("S1"));
        assert_eq!(skipped.count, 1);
    }

    #[test]
    fn description_leaves_out_excluded_fields() {
        let row = rows(json!([{"a": "Pump", "b": 3, "c": null, "skip": "x"}])).remove(0);
        assert_eq!(row_description(&row, &strings(&["skip"]), " "), "Pump 3");
    }

    #[test]
    fn description_keeps_input_column_order() {
        let row = rows(json!([{"zeta": "Pump", "alpha": "hot water", "mid": 7}])).remove(0);
        assert_eq!(row_description(&row, &[], " "), "Pump hot water 7");
        assert_eq!(row_description(&row, &strings(&["mid"]), " | "), "Pump | hot water");
    }

    #[test]
    fn partial_schema_config_keeps_defaults() {
        let config: SchemaConfig =
            serde_json::from_value(json!({"customer": {"building_id": "unit"}})).unwrap();
        assert_eq!(config.customer.building_id, "unit");
        assert_eq!(config.customer.label_fields, CustomerSchema::default().label_fields);
        assert_eq!(config.catalog, CatalogSchema::default());
    }

    #[test]
    fn load_rows_fingerprints_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, r#"[{"a": 1}, {"a": 2}]"#).unwrap();

        let loaded = load_rows(&path, "reference", &["a"]).unwrap();
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.fingerprint.rows, 2);
        assert_eq!(loaded.fingerprint.sha256.len(), 64);

        fs::write(&path, r#"[{"b": 1}]"#).unwrap();
        let err = load_rows(&path, "reference", &["a"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::MissingField { .. })
        ));
    }
}
