//! `localrag`: chunk, ingest and search local text collections.
//!
//! Without the `lance` feature the chunk store lives in memory, so `search`
//! and `stats` ingest `--dir` (default `data.raw_txt_dir`) before running.

mod corpus;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use localrag_core::config::{resolve_with_base, ChunkingSettings, Config, Settings};
use localrag_core::traits::ChunkStore;
use localrag_core::types::{MetadataFilter, SearchMode};
use localrag_core::{CancelToken, Chunker};
use localrag_hybrid::{HybridSearchEngine, SearchRequest};

#[derive(Parser)]
#[command(name = "localrag", version, about = "Hybrid vector + keyword retrieval over local text files")]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Collection to use (defaults to data.collection)
    #[arg(short, long, global = true)]
    collection: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split one file into chunks and print them
    Chunk {
        file: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that need the embedder and a chunk store.
#[derive(Subcommand)]
enum StoreCommand {
    /// Ingest every text file under a directory
    Ingest { dir: Option<PathBuf> },
    /// Search a collection
    Search {
        query: String,
        /// Directory to ingest first (always done for the in-memory store)
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Vector share of the fused score, 0..=1
        #[arg(short, long)]
        weight: Option<f32>,
        /// hybrid, vector or keyword
        #[arg(short, long, default_value = "hybrid")]
        mode: SearchMode,
        /// Exact-match metadata filter as a JSON object, e.g. '{"category":"water"}'
        #[arg(long)]
        filter: Option<String>,
        /// Drop vector hits scoring below this before fusion
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Show collection statistics
    Stats {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Remove one document from a collection
    Delete { doc_id: String },
}

#[cfg(feature = "lance")]
async fn open_store(settings: &Settings, base: &Path) -> Result<(Arc<dyn ChunkStore>, bool)> {
    let root = resolve_with_base(base, &settings.data.store_dir);
    info!(path = %root.display(), "opening lance store");
    let store = localrag_vector::LanceChunkStore::open(&root).await?;
    Ok((Arc::new(store), true))
}

#[cfg(not(feature = "lance"))]
#[allow(clippy::unused_async)]
async fn open_store(_settings: &Settings, _base: &Path) -> Result<(Arc<dyn ChunkStore>, bool)> {
    Ok((Arc::new(localrag_vector::MemoryChunkStore::new()), false))
}

struct App {
    settings: Settings,
    base: PathBuf,
    collection: String,
    engine: HybridSearchEngine<dyn ChunkStore>,
    persistent: bool,
    cancel: CancelToken,
}

impl App {
    async fn new(cli: &Cli, settings: Settings) -> Result<Self> {
        let embedder = localrag_embed::from_settings(&settings.embedding)?;
        let (store, persistent) = open_store(&settings, &cli.config_dir).await?;
        let engine = HybridSearchEngine::from_settings(embedder, store, &settings);
        let collection = cli.collection.clone().unwrap_or_else(|| settings.data.collection.clone());
        info!(collection = %collection, persistent, "engine ready");
        Ok(Self { base: cli.config_dir.clone(), collection, engine, persistent, cancel: CancelToken::new(), settings })
    }

    fn data_dir(&self, dir: Option<&PathBuf>) -> PathBuf {
        dir.cloned().unwrap_or_else(|| resolve_with_base(&self.base, &self.settings.data.raw_txt_dir))
    }

    async fn ingest(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            bail!("data directory {} does not exist", dir.display());
        }
        println!("📂 Ingesting {} into '{}'", dir.display(), self.collection);
        let summary =
            corpus::ingest_dir(&self.engine, dir, &self.collection, &self.settings.chunking, &self.cancel).await?;
        println!("✅ Ingested {} documents ({} chunks)", summary.documents, summary.chunks);
        if summary.failed > 0 {
            println!("⚠️  {} documents failed, see log", summary.failed);
        }
        Ok(())
    }

    /// The in-memory store starts empty every run; fill it before reading.
    async fn prepare(&self, dir: Option<&PathBuf>) -> Result<()> {
        if !self.persistent || dir.is_some() {
            self.ingest(&self.data_dir(dir)).await?;
        }
        Ok(())
    }

    async fn run(&self, command: &StoreCommand) -> Result<()> {
        match command {
            StoreCommand::Ingest { dir } => {
                if !self.persistent {
                    println!("⚠️  In-memory store: ingested chunks are discarded on exit (build with --features lance to persist)");
                }
                self.ingest(&self.data_dir(dir.as_ref())).await?;
            }
            StoreCommand::Search { query, dir, limit, weight, mode, filter, min_score, json } => {
                self.prepare(dir.as_ref()).await?;
                let search = &self.settings.search;
                let mut request = SearchRequest::new(query.clone(), self.collection.clone())
                    .with_limit(limit.unwrap_or(search.default_limit))
                    .with_weight(weight.unwrap_or(search.hybrid_weight))
                    .with_mode(*mode);
                if let Some(raw) = filter {
                    let value: serde_json::Value = serde_json::from_str(raw)?;
                    request = request.with_filter(MetadataFilter::from_json(&value)?);
                }
                if let Some(min) = min_score.or(search.min_vector_score) {
                    request = request.with_min_vector_score(min);
                }
                let response = self.engine.search(&request, &self.cancel).await?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                } else {
                    output::print_response(&response);
                }
            }
            StoreCommand::Stats { dir, json } => {
                self.prepare(dir.as_ref()).await?;
                let stats = self.engine.collection_stats(&self.collection).await?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    output::print_stats(&stats);
                }
            }
            StoreCommand::Delete { doc_id } => {
                if !self.persistent {
                    bail!("delete needs a persistent store (build with --features lance)");
                }
                if self.engine.delete_document(&self.collection, doc_id).await? {
                    println!("🗑️  Deleted {doc_id} from '{}'", self.collection);
                } else {
                    println!("No document {doc_id} in '{}'", self.collection);
                }
            }
        }
        Ok(())
    }
}

fn chunk_file(settings: &ChunkingSettings, file: &Path, size: Option<usize>, overlap: Option<usize>, json: bool) -> Result<()> {
    let chunker = Chunker::new(size.unwrap_or(settings.chunk_size), overlap.unwrap_or(settings.chunk_overlap))?
        .with_boundary_window(settings.boundary_window);
    let text = corpus::read_text(file)?;
    let chunks = chunker.split(&text);
    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
    } else {
        output::print_chunks(&chunks);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("info") } else { EnvFilter::new("warn") };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::load_in(&cli.config_dir).map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    debug!(env = config.env_name(), "configuration loaded");

    let command = match &cli.command {
        Command::Chunk { file, chunk_size, overlap, json } => {
            return chunk_file(&settings.chunking, file, *chunk_size, *overlap, *json);
        }
        Command::Store(command) => command,
    };

    let app = App::new(&cli, settings).await?;
    let cancel = app.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    app.run(command).await
}
