//! # Knowledge Index CLI (`kidx`)
//!
//! ## Usage
//!
//! ```bash
//! kidx --config ./config/kidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kidx init` | Create the SQLite database and run schema migrations |
//! | `kidx index <PATH>...` | Index files and directories |
//! | `kidx reindex [PATH]...` | Reprocess only files whose content changed |
//! | `kidx remove <PATH_OR_ID>` | Drop a source and its chunks |
//! | `kidx search "<query>"` | Semantic search over indexed chunks |
//! | `kidx similar <CHUNK_ID>` | Chunks similar to an indexed chunk |
//! | `kidx sources` | List indexed sources |
//! | `kidx stats` | Index statistics |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`, or
//! `info` with `--verbose`). Command output goes to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_index::config::{self, Config};
use knowledge_index::embedding::create_embedder;
use knowledge_index::models::{IndexSummary, SearchHit};
use knowledge_index::stats::{render_sources, render_stats};
use knowledge_index::{Indexer, SearchEngine, SearchOptions, SqliteStore, VectorStore};

const DEFAULT_CONFIG_PATH: &str = "./config/kidx.toml";

/// Knowledge Index: a local semantic index over your documents.
///
/// Configuration is read from `--config`. Without the flag,
/// `./config/kidx.toml` is used when present and built-in defaults otherwise.
/// See `config/kidx.example.toml` for every key.
#[derive(Parser)]
#[command(name = "kidx", version, about = "Local semantic index over document files")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Every other command also creates the schema on demand.
    Init,

    /// Index files and directories.
    ///
    /// Unchanged files (same content hash) are skipped unless `--force`
    /// is given.
    Index {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Reprocess files even when their content is unchanged.
        #[arg(long)]
        force: bool,

        /// Only index the top level of each directory.
        #[arg(long)]
        no_recursive: bool,
    },

    /// Reprocess files whose content changed since they were indexed.
    ///
    /// With no paths, every indexed source is checked.
    Reindex {
        paths: Vec<PathBuf>,
    },

    /// Remove a source by id or file path.
    Remove {
        path_or_id: String,
    },

    /// Search indexed chunks by meaning.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity (defaults to `retrieval.similarity_threshold`).
        #[arg(long)]
        threshold: Option<f32>,

        /// Widen each hit with text from neighbouring chunks. Without a
        /// value, `retrieval.context_chars` characters per side.
        #[arg(long, value_name = "CHARS")]
        context: Option<Option<usize>>,

        /// Omit chunk metadata from results.
        #[arg(long)]
        no_metadata: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Find chunks similar to an already indexed chunk.
    Similar {
        chunk_id: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// List indexed sources.
    Sources,

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = resolve_config(cli.config.as_deref())?;
    let store = Arc::new(SqliteStore::from_config(&cfg).await?);

    let result = run(cli.command, &cfg, store.clone()).await;
    store.close().await;
    result
}

async fn run(command: Commands, cfg: &Config, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let dyn_store: Arc<dyn VectorStore> = store.clone();

    match command {
        Commands::Init => {
            println!("Database initialized at {}", store.db_path().display());
        }
        Commands::Index {
            paths,
            force,
            no_recursive,
        } => {
            let indexer = build_indexer(cfg, dyn_store)?;
            let recursive = cfg.index.recursive && !no_recursive;

            let mut summary = IndexSummary::default();
            let mut files = Vec::new();
            for path in paths {
                if path.is_dir() {
                    let dir_summary = indexer.index_directory(&path, recursive, force).await?;
                    absorb(&mut summary, dir_summary);
                } else {
                    files.push(path);
                }
            }
            if !files.is_empty() {
                absorb(&mut summary, indexer.index_files(&files, force).await);
            }
            print_summary(&summary);
        }
        Commands::Reindex { paths } => {
            let indexer = build_indexer(cfg, dyn_store)?;
            let summary = indexer.reindex_changed_files(&paths).await?;
            print_summary(&summary);
        }
        Commands::Remove { path_or_id } => {
            let indexer = build_indexer(cfg, dyn_store)?;
            if indexer.remove_source(&path_or_id).await? {
                println!("Removed {}", path_or_id);
            } else {
                println!("No indexed source matches {}", path_or_id);
            }
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            context,
            no_metadata,
            json,
        } => {
            let engine = build_engine(cfg, dyn_store)?;
            let mut opts = SearchOptions::from_config(&cfg.retrieval).with_metadata(!no_metadata);
            if let Some(k) = top_k {
                opts = opts.with_top_k(k);
            }
            if let Some(t) = threshold {
                opts = opts.with_threshold(t);
            }

            let hits = match context {
                Some(chars) => {
                    let chars = chars.unwrap_or(cfg.retrieval.context_chars);
                    engine.search_with_context(&query, chars, &opts).await?
                }
                None => engine.search(&query, &opts).await?,
            };
            print_hits(&hits, json)?;
        }
        Commands::Similar {
            chunk_id,
            top_k,
            json,
        } => {
            let engine = build_engine(cfg, dyn_store)?;
            let mut opts = SearchOptions::from_config(&cfg.retrieval);
            if let Some(k) = top_k {
                opts = opts.with_top_k(k);
            }
            let hits = engine.find_similar_chunks(&chunk_id, &opts).await?;
            print_hits(&hits, json)?;
        }
        Commands::Sources => {
            let sources = dyn_store.list_sources().await?;
            print!("{}", render_sources(&sources));
        }
        Commands::Stats => {
            let indexer = build_indexer(cfg, dyn_store)?;
            print!("{}", render_stats(&indexer.get_index_stats().await?));
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// An explicit `--config` must exist; the default path is optional.
fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let cfg = match explicit {
        Some(path) => config::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                config::load_config(default_path)?
            } else {
                Config::default()
            }
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

fn build_indexer(cfg: &Config, store: Arc<dyn VectorStore>) -> anyhow::Result<Indexer> {
    let embedder = create_embedder(&cfg.embedding)?;
    Ok(Indexer::from_config(cfg, store, embedder)?)
}

fn build_engine(cfg: &Config, store: Arc<dyn VectorStore>) -> anyhow::Result<SearchEngine> {
    let embedder = create_embedder(&cfg.embedding)?;
    Ok(SearchEngine::new(store, embedder))
}

fn absorb(total: &mut IndexSummary, part: IndexSummary) {
    total.total_files += part.total_files;
    total.processed_files += part.processed_files;
    total.skipped_files += part.skipped_files;
    total.error_files += part.error_files;
    total.total_chunks += part.total_chunks;
    total.total_embeddings += part.total_embeddings;
    total.errors.extend(part.errors);
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "files: {} total, {} processed, {} skipped, {} failed",
        summary.total_files, summary.processed_files, summary.skipped_files, summary.error_files
    );
    println!(
        "chunks: {}, embeddings: {}",
        summary.total_chunks, summary.total_embeddings
    );
    for err in &summary.errors {
        eprintln!("  error: {}: {}", err.path.display(), err.error);
    }
}

fn print_hits(hits: &[SearchHit], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for hit in hits {
        println!(
            "{}. [{:.3}] {} (chunk {}, chars {}..{})",
            hit.rank,
            hit.similarity_score,
            hit.source_path.display(),
            hit.chunk.chunk_index,
            hit.chunk.start_char,
            hit.chunk.end_char
        );
        println!("    id: {}", hit.chunk.chunk_id);
        for (key, value) in &hit.chunk.metadata {
            println!("    {}: {}", key, value);
        }
        println!("    {}", snippet(&hit.chunk.text, 240));
        println!();
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}
