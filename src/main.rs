//! # corpus-drift CLI (`drift`)
//!
//! The `drift` binary drives the full pipeline: segment source documents
//! into chunk streams, build the baseline embedding index, query it, and
//! run change detection against newer guideline documents.
//!
//! ## Usage
//!
//! ```bash
//! drift --config ./config/drift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `drift segment <role>` | Segment reference or guideline documents into a chunk stream |
//! | `drift index build` | Embed reference chunks and build the baseline index |
//! | `drift index append` | Add new reference chunks to the existing index |
//! | `drift index info` | Print the persisted index metadata |
//! | `drift search "<query>"` | Query the baseline index by cosine similarity |
//! | `drift analyze` | Detect conceptual shifts and write the trend report |
//!
//! ## Examples
//!
//! ```bash
//! # Chunk the reference corpus and build the index
//! drift segment reference --config ./config/drift.toml
//! drift index build --config ./config/drift.toml
//!
//! # Chunk new guidelines and run detection
//! drift segment guidelines --config ./config/drift.toml
//! drift analyze --config ./config/drift.toml
//!
//! # Inspect what the index would retrieve for a topic
//! drift search "asthma maintenance therapy" --k 5
//! ```

mod analyze;
mod config;
mod embedding;
mod extract;
mod index;
mod ingest;
mod models;
mod oracle;
mod retry;
mod search;
mod segment;
mod sources;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use models::SourceRole;

/// corpus-drift CLI — detect conceptual drift between a reference corpus
/// and newer guideline documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/drift.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "drift",
    about = "corpus-drift — segmentation, embedding-index, and change-detection pipeline",
    version,
    long_about = "corpus-drift ingests a reference corpus and newer guideline documents, segments \
    them into addressable chunks, embeds the reference corpus into a flat vector index, and uses \
    similarity search plus an external classification oracle to record conceptual shifts."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/drift.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Segment source documents into a chunk stream.
    ///
    /// Scans the role's configured directory, extracts text (PDF,
    /// Markdown, plain text), cleans and segments it, and writes one
    /// JSON chunk per line to the role's stream file.
    Segment {
        /// Which corpus to segment: `reference` or `guidelines`.
        role: String,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Show document and chunk counts without writing the stream.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage the baseline embedding index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Query the baseline index by cosine similarity.
    ///
    /// Embeds the query text and prints the nearest stored chunks with
    /// their scores. Requires an embedding provider and a built index.
    Search {
        /// The query text.
        query: String,

        /// Number of results to return.
        #[arg(long, default_value_t = 3)]
        k: usize,
    },

    /// Detect conceptual shifts in guideline chunks.
    ///
    /// For every guideline chunk: embed, retrieve the nearest baseline
    /// chunks, ask the classification oracle for a verdict, and append a
    /// trend record when a shift is confirmed. Writes the trend report
    /// at the end even when individual chunks fail.
    Analyze {
        /// Maximum number of guideline chunks to analyze.
        #[arg(long)]
        limit: Option<usize>,

        /// Stop starting new chunks after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Show chunk counts and baseline status without calling any
        /// external service.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Index management subcommands.
#[derive(Subcommand)]
enum IndexAction {
    /// Embed all reference chunks and write a fresh index.
    Build,

    /// Embed reference chunks not yet in the index and re-save it.
    ///
    /// Chunk ids already present are skipped, so re-running after new
    /// reference material is segmented only embeds the additions.
    Append,

    /// Print the persisted index metadata.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Segment {
            role,
            limit,
            dry_run,
        } => {
            let role: SourceRole = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            ingest::run_segment(&cfg, role, limit, dry_run)?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build => {
                index::run_index_build(&cfg, false).await?;
            }
            IndexAction::Append => {
                index::run_index_build(&cfg, true).await?;
            }
            IndexAction::Info => {
                index::run_index_info(&cfg)?;
            }
        },
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Analyze {
            limit,
            timeout_secs,
            dry_run,
        } => {
            analyze::run_analyze(&cfg, limit, timeout_secs, dry_run).await?;
        }
    }

    Ok(())
}
