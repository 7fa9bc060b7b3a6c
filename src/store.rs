use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use crate::analysis::articles::{ArticleAssignment, ArticleStatus};
use crate::analysis::catalog::{CatalogMapping, CatalogMethod};
use crate::analysis::correlation::CorrelationMatrix;
use crate::analysis::dedup::{GroupingStats, SimilarityGroup};
use crate::analysis::frequency::{FrequencyCategory, FrequencyEntry, FrequencyTable};
use crate::analysis::mapping::InstallationMapping;
use crate::analysis::suggest::ReferenceContext;
use crate::errors::AnalysisError;
use crate::model::{MergedSuggestion, Suggestion, SuggestionReason};
use crate::util::now_utc_string;

pub const DB_FILE_NAME: &str = "assetcheck.sqlite";
pub const SCHEMA_VERSION: &str = "1";

pub fn db_path(cache_root: &Path) -> PathBuf {
    cache_root.join(DB_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageRunRow {
    pub stage: String,
    pub run_id: String,
    pub completed_at: String,
    pub manifest_path: String,
}

/// Latest artifacts of every stage. Each `replace_*` call swaps a stage's
/// tables wholesale inside one transaction.
pub struct ArtifactStore {
    connection: Connection,
    path: PathBuf,
}

impl ArtifactStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open artifact store {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace_reference(
        &mut self,
        frequency: &FrequencyTable,
        correlation: &CorrelationMatrix,
        article_keys: &BTreeMap<String, String>,
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute_batch(
            "
            DELETE FROM frequency_entries;
            DELETE FROM correlation_labels;
            DELETE FROM correlation_values;
            DELETE FROM article_keys;
            ",
        )?;

        {
            let mut insert = tx.prepare(
                "
                INSERT INTO frequency_entries(
                  position, installation_label, buildings_with_it, total_buildings, percent, category
                ) VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for (position, entry) in frequency.entries().iter().enumerate() {
                insert.execute(params![
                    position as i64,
                    entry.installation_label,
                    entry.buildings_with_it as i64,
                    entry.total_buildings as i64,
                    entry.percent,
                    entry.category.as_str(),
                ])?;
            }

            let mut insert_label =
                tx.prepare("INSERT INTO correlation_labels(position, label) VALUES(?1, ?2)")?;
            for (position, label) in correlation.labels().iter().enumerate() {
                insert_label.execute(params![position as i64, label])?;
            }

            let size = correlation.len();
            let mut insert_value = tx.prepare(
                "INSERT INTO correlation_values(row_idx, col_idx, value) VALUES(?1, ?2, ?3)",
            )?;
            for (offset, value) in correlation.values().iter().enumerate() {
                insert_value.execute(params![
                    (offset / size) as i64,
                    (offset % size) as i64,
                    nan_to_null(*value),
                ])?;
            }

            let mut insert_key =
                tx.prepare("INSERT INTO article_keys(label, article_key) VALUES(?1, ?2)")?;
            for (label, key) in article_keys {
                insert_key.execute(params![label, key])?;
            }
        }

        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_reference_context(&self) -> Result<ReferenceContext> {
        self.require_stage("reference", "reference statistics")?;

        let mut statement = self.connection.prepare(
            "
            SELECT installation_label, buildings_with_it, total_buildings, percent, category
            FROM frequency_entries
            ORDER BY position ASC
            ",
        )?;
        let mut rows = statement.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let category: String = row.get(4)?;
            entries.push(FrequencyEntry {
                installation_label: row.get(0)?,
                buildings_with_it: row.get::<_, i64>(1)? as usize,
                total_buildings: row.get::<_, i64>(2)? as usize,
                percent: row.get(3)?,
                category: FrequencyCategory::parse(&category)
                    .with_context(|| format!("unknown frequency category '{category}'"))?,
            });
        }

        let labels = self.collect_strings(
            "SELECT label FROM correlation_labels ORDER BY position ASC",
        )?;
        let mut statement = self.connection.prepare(
            "SELECT value FROM correlation_values ORDER BY row_idx ASC, col_idx ASC",
        )?;
        let values = statement
            .query_map([], |row| row.get::<_, Option<f64>>(0))?
            .map(|value| value.map(|value| value.unwrap_or(f64::NAN)))
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        let correlation = CorrelationMatrix::from_parts(labels, values)?;

        let mut statement = self
            .connection
            .prepare("SELECT label, article_key FROM article_keys ORDER BY label ASC")?;
        let article_keys = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;

        Ok(ReferenceContext {
            frequency: FrequencyTable::from_entries(entries),
            correlation,
            article_keys,
        })
    }

    pub fn replace_component_suggestions(
        &mut self,
        suggestions: &[Suggestion],
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM component_suggestions", [])?;
        insert_suggestion_rows(
            &tx,
            "component_suggestions",
            suggestions.iter().map(SuggestionRow::from),
        )?;
        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    /// `None` when the `components` stage never ran.
    pub fn load_component_suggestions(&self) -> Result<Option<Vec<Suggestion>>> {
        if self.stage_run("components")?.is_none() {
            return Ok(None);
        }
        let rows = self.load_suggestion_rows("component_suggestions")?;
        Ok(Some(rows.into_iter().map(Suggestion::from).collect()))
    }

    pub fn replace_groups(
        &mut self,
        groups: &[SimilarityGroup],
        stats: &GroupingStats,
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM similarity_groups", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO similarity_groups(representative_index, duplicate_indices) VALUES(?1, ?2)",
            )?;
            for group in groups {
                insert.execute(params![
                    group.representative_index as i64,
                    serde_json::to_string(&group.duplicate_indices)?,
                ])?;
            }
        }
        set_metadata(&tx, "grouping_stats", &serde_json::to_string(stats)?)?;
        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_groups(&self) -> Result<(Vec<SimilarityGroup>, GroupingStats)> {
        self.require_stage("dedup", "similarity groups")?;

        let mut statement = self.connection.prepare(
            "
            SELECT representative_index, duplicate_indices
            FROM similarity_groups
            ORDER BY representative_index ASC
            ",
        )?;
        let mut rows = statement.query([])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            let duplicates: String = row.get(1)?;
            groups.push(SimilarityGroup {
                representative_index: row.get::<_, i64>(0)? as usize,
                duplicate_indices: serde_json::from_str(&duplicates)
                    .context("failed to parse stored duplicate indices")?,
            });
        }

        let stats = self
            .metadata("grouping_stats")?
            .context("grouping statistics missing from artifact store")?;
        let stats = serde_json::from_str(&stats).context("failed to parse grouping statistics")?;
        Ok((groups, stats))
    }

    pub fn replace_catalog_mappings(
        &mut self,
        mappings: &[CatalogMapping],
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM catalog_mappings", [])?;
        {
            let mut insert = tx.prepare(
                "
                INSERT INTO catalog_mappings(representative_index, heading_key, score, method, failure)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ",
            )?;
            for mapping in mappings {
                insert.execute(params![
                    mapping.representative_index as i64,
                    mapping.heading_key,
                    nan_to_null(mapping.score),
                    mapping.method.as_str(),
                    mapping.failure,
                ])?;
            }
        }
        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_catalog_mappings(&self) -> Result<Vec<CatalogMapping>> {
        self.require_stage("catalog", "catalog mappings")?;

        let mut statement = self.connection.prepare(
            "
            SELECT representative_index, heading_key, score, method, failure
            FROM catalog_mappings
            ORDER BY representative_index ASC
            ",
        )?;
        let mut rows = statement.query([])?;
        let mut mappings = Vec::new();
        while let Some(row) = rows.next()? {
            let method: String = row.get(3)?;
            mappings.push(CatalogMapping {
                representative_index: row.get::<_, i64>(0)? as usize,
                heading_key: row.get(1)?,
                score: row.get::<_, Option<f64>>(2)?.unwrap_or(f64::NAN),
                method: CatalogMethod::parse(&method)
                    .with_context(|| format!("unknown catalog method '{method}'"))?,
                failure: row.get(4)?,
            });
        }
        Ok(mappings)
    }

    pub fn replace_article_assignments(
        &mut self,
        assignments: &[ArticleAssignment],
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM article_assignments", [])?;
        {
            let mut insert = tx.prepare(
                "
                INSERT INTO article_assignments(
                  row_index, representative_index, heading_key, article_number, status, failure
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for assignment in assignments {
                insert.execute(params![
                    assignment.row_index as i64,
                    assignment.representative_index as i64,
                    assignment.heading_key,
                    assignment.article_number,
                    assignment.status.as_str(),
                    assignment.failure,
                ])?;
            }
        }
        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_article_assignments(&self) -> Result<Vec<ArticleAssignment>> {
        self.require_stage("articles", "article assignments")?;

        let mut statement = self.connection.prepare(
            "
            SELECT row_index, representative_index, heading_key, article_number, status, failure
            FROM article_assignments
            ORDER BY row_index ASC
            ",
        )?;
        let mut rows = statement.query([])?;
        let mut assignments = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get(4)?;
            assignments.push(ArticleAssignment {
                row_index: row.get::<_, i64>(0)? as usize,
                representative_index: row.get::<_, i64>(1)? as usize,
                heading_key: row.get(2)?,
                article_number: row.get(3)?,
                status: ArticleStatus::parse(&status)
                    .with_context(|| format!("unknown article status '{status}'"))?,
                failure: row.get(5)?,
            });
        }
        Ok(assignments)
    }

    pub fn replace_suggestions(
        &mut self,
        mappings: &[InstallationMapping],
        merged: &[MergedSuggestion],
        run: &StageRunRow,
    ) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute_batch(
            "
            DELETE FROM installation_mappings;
            DELETE FROM merged_suggestions;
            ",
        )?;
        {
            let mut insert = tx.prepare(
                "
                INSERT INTO installation_mappings(
                  position, source_label, canonical_label, similarity_score, mapped, failure
                ) VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for (position, mapping) in mappings.iter().enumerate() {
                insert.execute(params![
                    position as i64,
                    mapping.source_label,
                    mapping.canonical_label,
                    nan_to_null(mapping.similarity_score),
                    mapping.mapped,
                    mapping.failure,
                ])?;
            }
        }
        insert_suggestion_rows(
            &tx,
            "merged_suggestions",
            merged.iter().map(SuggestionRow::from),
        )?;
        record_stage_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_installation_mappings(&self) -> Result<Vec<InstallationMapping>> {
        self.require_stage("suggest", "installation mappings")?;

        let mut statement = self.connection.prepare(
            "
            SELECT source_label, canonical_label, similarity_score, mapped, failure
            FROM installation_mappings
            ORDER BY position ASC
            ",
        )?;
        let mappings = statement
            .query_map([], |row| {
                Ok(InstallationMapping {
                    source_label: row.get(0)?,
                    canonical_label: row.get(1)?,
                    similarity_score: row.get::<_, Option<f64>>(2)?.unwrap_or(f64::NAN),
                    mapped: row.get(3)?,
                    failure: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }

    pub fn load_merged_suggestions(&self) -> Result<Vec<MergedSuggestion>> {
        self.require_stage("suggest", "merged suggestions")?;
        let rows = self.load_suggestion_rows("merged_suggestions")?;
        Ok(rows.into_iter().map(MergedSuggestion::from).collect())
    }

    pub fn stage_run(&self, stage: &str) -> Result<Option<StageRunRow>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT stage, run_id, completed_at, manifest_path
                FROM stage_runs
                WHERE stage = ?1
                ",
                params![stage],
                stage_run_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn stage_runs(&self) -> Result<Vec<StageRunRow>> {
        let mut statement = self.connection.prepare(
            "
            SELECT stage, run_id, completed_at, manifest_path
            FROM stage_runs
            ORDER BY completed_at ASC, stage ASC
            ",
        )?;
        let runs = statement
            .query_map([], stage_run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Row count of one artifact table.
    pub fn table_count(&self, table: &str) -> Result<i64> {
        if !ARTIFACT_TABLES.contains(&table) {
            bail!("unknown artifact table '{table}'");
        }
        let count = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }

    fn require_stage(&self, stage: &str, artifact: &str) -> Result<StageRunRow> {
        match self.stage_run(stage)? {
            Some(run) => Ok(run),
            None => Err(AnalysisError::MissingArtifact {
                artifact: artifact.to_string(),
                producer: stage.to_string(),
            }
            .into()),
        }
    }

    fn metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn collect_strings(&self, sql: &str) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(sql)?;
        let values = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }

    fn load_suggestion_rows(&self, table: &str) -> Result<Vec<SuggestionRow>> {
        let mut statement = self.connection.prepare(&format!(
            "
            SELECT building_id, installation_label, probability, reason, rationale, article_key
            FROM {table}
            ORDER BY position ASC
            "
        ))?;
        let mut rows = statement.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let reason: String = row.get(3)?;
            out.push(SuggestionRow {
                building_id: row.get(0)?,
                installation_label: row.get(1)?,
                probability: row.get(2)?,
                reason: SuggestionReason::parse(&reason)
                    .with_context(|| format!("unknown suggestion reason '{reason}'"))?,
                rationale: row.get(4)?,
                article_key: row.get(5)?,
            });
        }
        Ok(out)
    }
}

pub const ARTIFACT_TABLES: &[&str] = &[
    "frequency_entries",
    "correlation_labels",
    "correlation_values",
    "article_keys",
    "component_suggestions",
    "similarity_groups",
    "catalog_mappings",
    "article_assignments",
    "installation_mappings",
    "merged_suggestions",
];

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stage_runs (
          stage TEXT PRIMARY KEY,
          run_id TEXT NOT NULL,
          completed_at TEXT NOT NULL,
          manifest_path TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS frequency_entries (
          position INTEGER PRIMARY KEY,
          installation_label TEXT NOT NULL UNIQUE,
          buildings_with_it INTEGER NOT NULL,
          total_buildings INTEGER NOT NULL,
          percent REAL NOT NULL,
          category TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS correlation_labels (
          position INTEGER PRIMARY KEY,
          label TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS correlation_values (
          row_idx INTEGER NOT NULL,
          col_idx INTEGER NOT NULL,
          value REAL,
          PRIMARY KEY(row_idx, col_idx)
        );

        CREATE TABLE IF NOT EXISTS article_keys (
          label TEXT PRIMARY KEY,
          article_key TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS component_suggestions (
          position INTEGER PRIMARY KEY,
          building_id TEXT NOT NULL,
          installation_label TEXT NOT NULL,
          probability REAL NOT NULL,
          reason TEXT NOT NULL,
          rationale TEXT NOT NULL,
          article_key TEXT
        );

        CREATE TABLE IF NOT EXISTS similarity_groups (
          representative_index INTEGER PRIMARY KEY,
          duplicate_indices TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS catalog_mappings (
          representative_index INTEGER PRIMARY KEY,
          heading_key TEXT,
          score REAL,
          method TEXT NOT NULL,
          failure TEXT
        );

        CREATE TABLE IF NOT EXISTS article_assignments (
          row_index INTEGER PRIMARY KEY,
          representative_index INTEGER NOT NULL,
          heading_key TEXT,
          article_number TEXT,
          status TEXT NOT NULL,
          failure TEXT
        );

        CREATE TABLE IF NOT EXISTS installation_mappings (
          position INTEGER PRIMARY KEY,
          source_label TEXT NOT NULL,
          canonical_label TEXT,
          similarity_score REAL,
          mapped INTEGER NOT NULL,
          failure TEXT
        );

        CREATE TABLE IF NOT EXISTS merged_suggestions (
          position INTEGER PRIMARY KEY,
          building_id TEXT NOT NULL,
          installation_label TEXT NOT NULL,
          probability REAL NOT NULL,
          reason TEXT NOT NULL,
          rationale TEXT NOT NULL,
          article_key TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_merged_suggestions_building
          ON merged_suggestions(building_id);
        ",
    )?;

    connection.execute(
        "
        INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

fn set_metadata(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    tx.execute(
        "
        INSERT INTO metadata(key, value) VALUES(?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        params![key, value],
    )?;
    Ok(())
}

fn record_stage_run(tx: &Transaction<'_>, run: &StageRunRow) -> Result<()> {
    tx.execute(
        "
        INSERT INTO stage_runs(stage, run_id, completed_at, manifest_path)
        VALUES(?1, ?2, ?3, ?4)
        ON CONFLICT(stage) DO UPDATE SET
          run_id=excluded.run_id,
          completed_at=excluded.completed_at,
          manifest_path=excluded.manifest_path
        ",
        params![run.stage, run.run_id, run.completed_at, run.manifest_path],
    )?;
    Ok(())
}

fn stage_run_from_row(row: &Row<'_>) -> rusqlite::Result<StageRunRow> {
    Ok(StageRunRow {
        stage: row.get(0)?,
        run_id: row.get(1)?,
        completed_at: row.get(2)?,
        manifest_path: row.get(3)?,
    })
}

impl StageRunRow {
    pub fn new(stage: &str, run_id: &str, manifest_path: &Path) -> Self {
        Self {
            stage: stage.to_string(),
            run_id: run_id.to_string(),
            completed_at: now_utc_string(),
            manifest_path: manifest_path.display().to_string(),
        }
    }
}

fn nan_to_null(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

/// Shared column layout of the two suggestion tables.
struct SuggestionRow {
    building_id: String,
    installation_label: String,
    probability: f64,
    reason: SuggestionReason,
    rationale: String,
    article_key: Option<String>,
}

impl From<&Suggestion> for SuggestionRow {
    fn from(value: &Suggestion) -> Self {
        Self {
            building_id: value.building_id.clone(),
            installation_label: value.installation_label.clone(),
            probability: value.probability,
            reason: value.reason,
            rationale: value.rationale.clone(),
            article_key: value.article_key.clone(),
        }
    }
}

impl From<&MergedSuggestion> for SuggestionRow {
    fn from(value: &MergedSuggestion) -> Self {
        Self {
            building_id: value.building_id.clone(),
            installation_label: value.installation_label.clone(),
            probability: value.probability,
            reason: value.reason,
            rationale: value.rationale.clone(),
            article_key: value.article_key.clone(),
        }
    }
}

impl From<SuggestionRow> for Suggestion {
    fn from(value: SuggestionRow) -> Self {
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

impl From<SuggestionRow> for MergedSuggestion {
    fn from(value: SuggestionRow) -> Self {
        MergedSuggestion::from(Suggestion::from(value))
    }
}

fn insert_suggestion_rows(
    tx: &Transaction<'_>,
    table: &str,
    rows: impl Iterator<Item = SuggestionRow>,
) -> Result<()> {
    let mut insert = tx.prepare(&format!(
        "
        INSERT INTO {table}(
          position, building_id, installation_label, probability, reason, rationale, article_key
        ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "
    ))?;
    for (position, row) in rows.enumerate() {
        insert.execute(params![
            position as i64,
            row.building_id,
            row.installation_label,
            row.probability,
            row.reason.as_str(),
            row.rationale,
            row.article_key,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
