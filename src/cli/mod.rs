use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "viability-memory",
    version,
    about = "Archive viability documents and search them by similarity"
)]
pub struct Cli {
    /// Path to a configuration file (JSON5, YAML or TOML).
    #[arg(short, long, global = true, env = "VIABILITY_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply migrations.
    Init,
    Ingest(IngestOpts),
    Search(SearchOpts),
    /// Print one viability as JSON.
    Show { id: i64 },
    /// List every archived viability.
    List,
    Update(UpdateOpts),
    /// Delete a viability together with its chunks and chat logs.
    Delete { id: i64 },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Version,
}

/// Chunk, embed and store a document's extracted text.
#[derive(clap::Args)]
pub struct IngestOpts {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub client: String,
    #[arg(long = "type")]
    pub viability_type: String,
    /// Original document location, recorded as-is.
    #[arg(long)]
    pub file: String,
    /// UTF-8 text to ingest; `-` reads stdin. Defaults to `--file`.
    #[arg(long)]
    pub text_file: Option<String>,
}

/// Find stored excerpts similar to a query.
#[derive(clap::Args)]
pub struct SearchOpts {
    pub query: String,
    /// Number of results; defaults to `memory.topK`.
    #[arg(short, long)]
    pub k: Option<usize>,
    /// Drop hits at or above this distance; defaults to `memory.relevanceThreshold`.
    #[arg(short, long)]
    pub threshold: Option<f32>,
    /// Print raw ranked results without relevance filtering.
    #[arg(long)]
    pub raw: bool,
}

/// Record analysis results for a viability.
#[derive(clap::Args)]
pub struct UpdateOpts {
    pub id: i64,
    #[arg(long)]
    pub processed: Option<bool>,
    #[arg(long)]
    pub summary: Option<String>,
    #[arg(long)]
    pub feedback: Option<String>,
    #[arg(long)]
    pub score: Option<f64>,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    Init,
}
