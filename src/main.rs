//! # RGPD Harness CLI (`rgpd`)
//!
//! Scrapes the RGPD and CNIL sanctions from cnil.fr, indexes them and
//! answers questions over them.
//!
//! ## Usage
//!
//! ```bash
//! rgpd --config ./config/rgpd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgpd init` | Create the SQLite database and run schema migrations |
//! | `rgpd sources` | List scrape targets and provider health |
//! | `rgpd sync <target>` | Scrape and ingest `all`, `recitals`, `articles` or `sanctions` |
//! | `rgpd search "<query>"` | Search indexed documents |
//! | `rgpd get <id>` | Retrieve a full document by UUID |
//! | `rgpd embed pending` | Backfill missing or stale embeddings |
//! | `rgpd embed rebuild` | Delete and regenerate all embeddings |
//! | `rgpd ask "<question>"` | Stream an answer to stdout |
//! | `rgpd export` | Dump documents and chunks as JSON |
//! | `rgpd stats` | Show index statistics |
//! | `rgpd serve` | Start the HTTP server |
//! | `rgpd run` | init, sync all, embed pending, then serve |
//!
//! ## Examples
//!
//! ```bash
//! rgpd init
//! rgpd sync all
//! rgpd search "consentement" --source articles
//! OPENAI_API_KEY=... rgpd ask "Quelles sont les sanctions pour défaut de sécurité ?"
//! rgpd run --skip-scrape
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rgpd_harness::progress::ProgressMode;
use rgpd_harness::{
    answer, config, embed_cmd, export, get, ingest, migrate, search, server, sources, stats,
};

/// RGPD Harness CLI: scrape, index and query the RGPD and CNIL sanctions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rgpd.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rgpd",
    about = "RGPD Harness — retrieval-augmented answers over the RGPD and CNIL sanctions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rgpd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, checkpoints, chunks_fts, embeddings, chunk_vectors).
    /// Running it multiple times is safe.
    Init,

    /// List scrape targets and provider status.
    Sources,

    /// Scrape a target and ingest its records.
    ///
    /// Unchanged records are skipped; records no longer on the site are
    /// removed unless `--limit` is given.
    Sync {
        /// `all`, `recitals`, `articles` or `sanctions`.
        target: String,

        /// Re-ingest every record, even unchanged ones.
        #[arg(long)]
        full: bool,

        /// Dry run: show item and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of items to process per target.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to `human`
        /// on a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search indexed documents.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid` (weighted merge).
        /// Semantic and hybrid modes require an embedding provider to be configured.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Filter results to one source (`recitals`, `articles`, `sanctions`).
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Retrieve a document by its UUID.
    Get {
        /// Document UUID.
        id: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Print the retrieved context before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Export documents and chunks as JSON.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Only export one source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP server.
    Serve,

    /// Run the whole pipeline: init, sync all, embed pending, serve.
    Run {
        /// Skip scraping and embedding; serve the existing index.
        #[arg(long)]
        skip_scrape: bool,

        /// Progress on stderr while syncing: `off`, `human` or `json`.
        #[arg(long)]
        progress: Option<String>,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_mode(flag: Option<&str>) -> Result<ProgressMode> {
    match flag {
        None => Ok(ProgressMode::default_for_tty()),
        Some(s) => ProgressMode::parse(s)
            .ok_or_else(|| anyhow!("Unknown progress mode: '{}'. Use off, human, or json.", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync {
            target,
            full,
            dry_run,
            limit,
            progress,
        } => {
            let reporter = progress_mode(progress.as_deref())?.reporter();
            ingest::run_sync(&cfg, &target, full, dry_run, limit, reporter.as_ref()).await?;
        }
        Commands::Search {
            query,
            mode,
            source,
            limit,
        } => {
            search::run_search(&cfg, &query, &mode, source, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Ask {
            question,
            show_context,
        } => {
            answer::run_ask(&cfg, &question, show_context).await?;
        }
        Commands::Export { output, source } => {
            export::run_export(&cfg, source.as_deref(), output.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Run {
            skip_scrape,
            progress,
        } => {
            migrate::run_migrations(&cfg).await?;
            if skip_scrape {
                info!("skipping scrape, serving existing index");
            } else {
                // A failed scrape or embed still leaves an index worth serving.
                let reporter = progress_mode(progress.as_deref())?.reporter();
                if let Err(e) =
                    ingest::run_sync(&cfg, "all", false, false, None, reporter.as_ref()).await
                {
                    warn!(error = %e, "sync incomplete, serving existing index");
                }
                if cfg.embedding.is_enabled() {
                    if let Err(e) = embed_cmd::run_embed_pending(&cfg, None, None, false).await {
                        warn!(error = %e, "embedding failed, serving existing index");
                    }
                }
            }
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
