//! Directory loading: every `.txt`/`.md` file under a root becomes a document,
//! tagged with the sub-directory it sits in.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use localrag_core::config::ChunkingSettings;
use localrag_core::traits::ChunkStore;
use localrag_core::types::{Document, MetaValue, Metadata};
use localrag_core::{CancelToken, ErrorKind};
use localrag_hybrid::{HybridSearchEngine, IngestReport};

const EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// A file read from disk, ready for ingestion.
pub struct SourceFile {
    pub document: Document,
    pub category: String,
}

pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    files
}

/// Reads a file as UTF-8, replacing invalid sequences.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Parent directory relative to `root`, `misc` for files directly under it.
pub fn category(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty())
        .map_or_else(|| "misc".to_string(), |p| p.replace('\\', "/"))
}

pub fn load(root: &Path) -> Result<Vec<SourceFile>> {
    list_files(root)
        .into_iter()
        .map(|path| {
            let text = read_text(&path)?;
            let filename = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            Ok(SourceFile { category: category(&path, root), document: Document::new(filename, text) })
        })
        .collect()
}

/// Totals of one directory ingestion.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
    pub failed: usize,
}

/// Ingests every file under `root`. A failing document is logged and counted;
/// the rest still go in.
pub async fn ingest_dir<S: ChunkStore + ?Sized + 'static>(
    engine: &HybridSearchEngine<S>,
    root: &Path,
    collection: &str,
    chunking: &ChunkingSettings,
    cancel: &CancelToken,
) -> Result<IngestSummary> {
    let files = load(root)?;
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    let mut summary = IngestSummary::default();
    for file in files {
        pb.set_message(file.document.filename.clone());
        let mut extra = Metadata::new();
        extra.insert("category".to_string(), MetaValue::from(file.category));
        match engine.ingest(collection, &file.document, chunking, &extra, cancel).await {
            Ok(IngestReport { chunks, .. }) => {
                summary.documents += 1;
                summary.chunks += chunks;
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                pb.abandon_with_message("cancelled");
                return Err(e.into());
            }
            Err(e) => {
                warn!(filename = %file.document.filename, error = %e, "skipping document");
                summary.failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    Ok(summary)
}
