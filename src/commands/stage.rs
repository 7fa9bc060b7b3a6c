use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::EmbeddingArgs;
use crate::input::{LoadedRows, SchemaConfig, load_schema_config};
use crate::model::{InputFingerprint, StageRunManifest};
use crate::semantic::{EmbeddedTexts, EmbeddingService, LocalHashEmbedder, embed_in_batches, resolve_model_config};
use crate::store::{ArtifactStore, StageRunRow, db_path};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

/// Bookkeeping shared by every stage run: ids, inputs, warnings and the run
/// manifest written on success.
pub struct StageContext {
    pub stage: &'static str,
    pub run_id: String,
    pub started_at: String,
    pub db_path: PathBuf,
    pub manifest_path: PathBuf,
    pub schema: SchemaConfig,
    inputs: Vec<InputFingerprint>,
    warnings: Vec<String>,
}

impl StageContext {
    pub fn start(stage: &'static str, cache_root: &Path, schema_config: Option<&Path>) -> Result<Self> {
        let started_ts = Utc::now();
        let run_id = format!("{stage}-{}", utc_compact_string(started_ts));

        let manifest_dir = cache_root.join("manifests");
        ensure_directory(&manifest_dir)?;
        let manifest_path = manifest_dir.join(format!(
            "{stage}_run_{}.json",
            utc_compact_string(started_ts)
        ));

        info!(stage, run_id = %run_id, cache_root = %cache_root.display(), "starting stage");

        Ok(Self {
            stage,
            run_id,
            started_at: now_utc_string(),
            db_path: db_path(cache_root),
            manifest_path,
            schema: load_schema_config(schema_config)?,
            inputs: Vec::new(),
            warnings: Vec::new(),
        })
    }

    pub fn open_store(&self) -> Result<ArtifactStore> {
        ArtifactStore::open(&self.db_path)
    }

    pub fn track_input(&mut self, loaded: &LoadedRows) {
        info!(
            stage = self.stage,
            input = %loaded.input,
            sha256 = %loaded.fingerprint.sha256,
            "tracking input"
        );
        self.inputs.push(loaded.fingerprint.clone());
    }

    pub fn warn(&mut self, message: String) {
        warn!(stage = self.stage, "{message}");
        self.warnings.push(message);
    }

    pub fn run_row(&self) -> StageRunRow {
        StageRunRow::new(self.stage, &self.run_id, &self.manifest_path)
    }

    /// Embeds `texts` with the configured local model, recording failed
    /// batches as warnings.
    pub fn embed(&mut self, args: &EmbeddingArgs, what: &str, texts: &[String]) -> EmbeddedTexts {
        let embedder = LocalHashEmbedder::new(resolve_model_config(&args.model_id, args.dimensions));
        let embedded = embed_in_batches(&embedder, texts, args.batch_size);
        info!(
            stage = self.stage,
            model_id = %embedder.model_id(),
            what,
            texts = texts.len(),
            failed = embedded.failed_count(),
            "embedded texts"
        );
        for failure in &embedded.failures {
            self.warn(format!("{what} embedding {failure}"));
        }
        embedded
    }

    /// Like [`Self::embed`] but for sparse inputs: `None` texts stay `None`
    /// and are not counted as failures.
    pub fn embed_sparse(
        &mut self,
        args: &EmbeddingArgs,
        what: &str,
        texts: &[Option<String>],
    ) -> SparseEmbeddings {
        let (positions, present): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .filter_map(|(index, text)| text.clone().map(|text| (index, text)))
            .unzip();
        let embedded = self.embed(args, what, &present);

        let mut out = SparseEmbeddings {
            vectors: vec![None; texts.len()],
            failed: Vec::new(),
        };
        for (position, vector) in positions.into_iter().zip(embedded.vectors) {
            match vector {
                Some(vector) => out.vectors[position] = Some(vector),
                None => out.failed.push(position),
            }
        }
        out
    }

    pub fn finish<P: Serialize, C: Serialize>(self, parameters: &P, counts: C) -> Result<PathBuf> {
        let manifest = StageRunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id: self.run_id,
            stage: self.stage.to_string(),
            started_at: self.started_at,
            completed_at: now_utc_string(),
            status: "completed".to_string(),
            db_path: self.db_path.display().to_string(),
            inputs: self.inputs,
            parameters: serde_json::to_value(parameters)?,
            counts,
            warnings: self.warnings,
        };

        write_json_pretty(&self.manifest_path, &manifest)?;
        info!(
            stage = self.stage,
            run_id = %manifest.run_id,
            warnings = manifest.warnings.len(),
            path = %self.manifest_path.display(),
            "wrote run manifest"
        );
        Ok(self.manifest_path)
    }
}

pub struct SparseEmbeddings {
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Positions whose text was present but could not be embedded.
    pub failed: Vec<usize>,
}

/// Fails when `--require-complete` is set and any item failed.
pub fn enforce_complete(require_complete: bool, what: &str, failed: usize) -> Result<()> {
    if require_complete && failed > 0 {
        bail!("{failed} {what} failed and --require-complete is set");
    }
    Ok(())
}
