//! # mediatrace CLI (`mtrace`)
//!
//! The `mtrace` binary is the primary interface for mediatrace. It provides
//! commands for database initialization, corpus enumeration, resumable
//! batch processing, ledger replay, retrieval, and collection curation.
//!
//! ## Usage
//!
//! ```bash
//! mtrace --config ./config/mediatrace.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mtrace init` | Create the SQLite database and run schema migrations |
//! | `mtrace scan <root>` | Enumerate media files into a list artifact |
//! | `mtrace process <run>` | Describe, embed, hash, and upsert each listed file |
//! | `mtrace ingest <run>` | Replay an output ledger into the store |
//! | `mtrace search "<query>"` | Search the corpus (lexical, vector, hybrid) |
//! | `mtrace get <id>` | Show an asset and record the view |
//! | `mtrace history <id>` | Show an asset's access history |
//! | `mtrace collection ...` | Create and curate collections |
//! | `mtrace stats` | Corpus and run statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mediatrace::collections::{self, MutationAction};
use mediatrace::config;
use mediatrace::get;
use mediatrace::ingest;
use mediatrace::migrate;
use mediatrace::progress::ProgressMode;
use mediatrace::runner;
use mediatrace::scan;
use mediatrace::search::{self, Interpretation, SearchMode, SearchRequest};
use mediatrace::stats;

/// mediatrace CLI — a local-first media indexing and hybrid retrieval
/// engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mediatrace.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mtrace",
    about = "mediatrace — a local-first media indexing and hybrid retrieval engine",
    version,
    long_about = "mediatrace walks a media directory, generates a description and an embedding \
    for every file via external generators, persists the results with idempotent change \
    tracking, and serves lexical, vector, and hybrid (RRF) retrieval over the corpus."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mediatrace.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (media_assets, access_events, collections, assets_fts).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Enumerate media files under a directory into a list artifact.
    ///
    /// Walks the tree depth-first in sorted order, keeps files whose
    /// extension matches the media allow-list, and streams normalized
    /// paths to `<data_dir>/<run>.lst`, replacing any prior list.
    Scan {
        /// Root directory to enumerate.
        root: PathBuf,

        /// Run name for the list artifact (defaults to the root's name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Process a previously scanned run, resumably.
    ///
    /// For each listed file: stage the path, generate a description,
    /// embed it, hash the content, append to the output ledger, and
    /// upsert into the store. A durable checkpoint written before each
    /// item makes an interrupted run resume at the interrupted item.
    Process {
        /// Run name (list artifact stem).
        run: String,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Replay a run's output ledger into the store.
    ///
    /// Re-ingests every record in `<data_dir>/<run>.jsonl`, embedding
    /// records that have no vector yet. Safe to repeat: re-ingestion
    /// touches revisions but never duplicates assets.
    Ingest {
        /// Run name (ledger stem).
        run: String,
    },

    /// Search indexed assets.
    ///
    /// Lexical mode ranks by text relevance, vector mode by cosine
    /// distance, and hybrid fuses both rankings with Reciprocal Rank
    /// Fusion. Results are deterministic: ties break by ascending id.
    Search {
        /// The search query text (optional when --reference is given).
        #[arg(default_value = "")]
        query: String,

        /// Search mode: `lexical`, `vector`, or `hybrid`.
        #[arg(long, default_value = "lexical")]
        mode: String,

        /// Lexical interpretation: `natural` or `boolean`.
        #[arg(long, default_value = "natural")]
        interpretation: String,

        /// Widen lexical matching with prefix expansion.
        #[arg(long)]
        expansion: bool,

        /// Rank against this asset's stored embedding (find-similar).
        #[arg(long)]
        reference: Option<i64>,

        /// Number of leading results to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show an asset by id and record the view.
    Get {
        /// Asset id.
        id: i64,
    },

    /// Show an asset's access history, newest first.
    History {
        /// Asset id.
        id: i64,
    },

    /// Create and curate collections of assets.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Corpus statistics, optionally including one run's artifacts.
    Stats {
        /// Run name to report artifact state for.
        #[arg(long)]
        run: Option<String>,
    },
}

/// Collection curation subcommands.
#[derive(Subcommand)]
enum CollectionAction {
    /// Create a new, empty collection.
    Create {
        /// Collection title (unique).
        title: String,
        /// Optional description.
        #[arg(long)]
        description: Option<String>,
        /// Representative asset id.
        #[arg(long)]
        cover: Option<i64>,
    },
    /// Add assets to a collection (set union; idempotent).
    Add {
        /// Collection id.
        id: i64,
        /// Asset ids to add.
        #[arg(required = true)]
        asset_ids: Vec<i64>,
    },
    /// Remove assets from a collection (set difference; idempotent).
    Remove {
        /// Collection id.
        id: i64,
        /// Asset ids to remove.
        #[arg(required = true)]
        asset_ids: Vec<i64>,
    },
    /// Show a collection and its members.
    Show {
        /// Collection id.
        id: i64,
    },
    /// List all collections.
    List,
    /// Set a collection's representative asset.
    Cover {
        /// Collection id.
        id: i64,
        /// Asset id to use as cover.
        asset_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan { root, name } => {
            scan::run_scan(&cfg, &root, name)?;
        }
        Commands::Process { run, progress } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => anyhow::bail!(
                    "Unknown progress mode: {}. Use off, human, or json.",
                    other
                ),
            };
            let reporter = mode.reporter();
            runner::run_process(&cfg, &run, reporter.as_ref()).await?;
        }
        Commands::Ingest { run } => {
            ingest::run_ingest(&cfg, &run).await?;
        }
        Commands::Search {
            query,
            mode,
            interpretation,
            expansion,
            reference,
            offset,
            limit,
        } => {
            let request = SearchRequest {
                query,
                mode: SearchMode::parse(&mode)?,
                interpretation: Interpretation::parse(&interpretation)?,
                expansion,
                reference_asset_id: reference,
                offset,
                limit: limit.unwrap_or(cfg.retrieval.final_limit),
            };
            search::run_search(&cfg, request).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::History { id } => {
            get::run_history(&cfg, id).await?;
        }
        Commands::Collection { action } => match action {
            CollectionAction::Create {
                title,
                description,
                cover,
            } => {
                collections::run_create(&cfg, &title, description.as_deref(), cover).await?;
            }
            CollectionAction::Add { id, asset_ids } => {
                collections::run_mutate(&cfg, id, MutationAction::Add, &asset_ids).await?;
            }
            CollectionAction::Remove { id, asset_ids } => {
                collections::run_mutate(&cfg, id, MutationAction::Remove, &asset_ids).await?;
            }
            CollectionAction::Show { id } => {
                collections::run_show(&cfg, id).await?;
            }
            CollectionAction::List => {
                collections::run_list(&cfg).await?;
            }
            CollectionAction::Cover { id, asset_id } => {
                collections::run_cover(&cfg, id, asset_id).await?;
            }
        },
        Commands::Stats { run } => {
            stats::run_stats(&cfg, run).await?;
        }
    }

    Ok(())
}
