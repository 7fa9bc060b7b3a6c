use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::analysis::categorize::DEFAULT_MIN_OVERLAP;
use crate::analysis::dedup::DEFAULT_DEDUP_THRESHOLD;
use crate::analysis::mapping::{DEFAULT_CATALOG_THRESHOLD, DEFAULT_MAPPING_THRESHOLD};
use crate::analysis::suggest::{
    DEFAULT_CORRELATION_THRESHOLD, DEFAULT_FREQUENCY_THRESHOLD,
    DEFAULT_MAX_CORRELATION_SUGGESTIONS,
};
use crate::semantic::{DEFAULT_EMBEDDING_DIM, DEFAULT_MODEL_ID};

#[derive(Parser, Debug)]
#[command(
    name = "assetcheck",
    version,
    about = "Installation inventory completeness checks against reference buildings"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Frequency, correlation and article keys from reference buildings.
    Reference(ReferenceArgs),
    /// Missing components of systems present in customer buildings.
    Components(ComponentsArgs),
    /// Groups near-duplicate customer records.
    Dedup(DedupArgs),
    /// Maps group representatives onto catalog headings.
    Catalog(CatalogArgs),
    /// Picks an article number inside each matched catalog heading group.
    Articles(ArticlesArgs),
    /// Suggests missing installations per customer building.
    Suggest(SuggestArgs),
    /// Reports stage runs and stored artifact counts.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReferenceArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    /// JSON array of reference observation rows.
    #[arg(long)]
    pub observations: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ComponentsArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    /// JSON array of reference asset rows (systems and components).
    #[arg(long)]
    pub assets: PathBuf,

    #[arg(long)]
    pub customer: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub dimensions: usize,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DedupArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    #[arg(long)]
    pub customer: PathBuf,

    #[arg(long, default_value_t = DEFAULT_DEDUP_THRESHOLD)]
    pub threshold: f64,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CategorizerMode {
    Local,
    Off,
}

impl CategorizerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Off => "off",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    #[arg(long)]
    pub customer: PathBuf,

    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CATALOG_THRESHOLD)]
    pub threshold: f64,

    #[arg(long, value_enum, default_value_t = CategorizerMode::Local)]
    pub categorizer: CategorizerMode,

    #[arg(long, default_value_t = DEFAULT_MIN_OVERLAP)]
    pub min_overlap: f64,

    /// Fail the stage when any record could not be embedded or categorized.
    #[arg(long, default_value_t = false)]
    pub require_complete: bool,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ArticlesArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    #[arg(long)]
    pub customer: PathBuf,

    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MIN_OVERLAP)]
    pub min_overlap: f64,

    /// Fail the stage when any answer was rejected or the categorizer failed.
    #[arg(long, default_value_t = false)]
    pub require_complete: bool,

    /// Write the customer rows annotated with their article number here.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SuggestArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub schema_config: Option<PathBuf>,

    #[arg(long)]
    pub customer: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAPPING_THRESHOLD)]
    pub mapping_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_FREQUENCY_THRESHOLD)]
    pub frequency_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_CORRELATION_THRESHOLD)]
    pub correlation_threshold: f64,

    /// 0 keeps every correlated candidate.
    #[arg(long, default_value_t = DEFAULT_MAX_CORRELATION_SUGGESTIONS)]
    pub max_correlation_suggestions: usize,

    #[arg(long, default_value_t = false)]
    pub require_complete: bool,

    /// Also write the merged suggestions to this JSON file.
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/assetcheck")]
    pub cache_root: PathBuf,
}
