//! Document ingestion: chunk, embed in concurrent batches, then hand the whole
//! chunk set to the store in one atomic write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use localrag_core::chunker::{estimate_page, Chunker, TextChunk};
use localrag_core::config::{ChunkingSettings, EmbeddingSettings, RuntimeSettings};
use localrag_core::error::{Error, IngestStage, Result};
use localrag_core::traits::{ChunkStore, Embedder};
use localrag_core::types::{Chunk, Document, MetaValue, Metadata};
use localrag_core::CancelToken;

use crate::guard::{detached, guarded};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Texts per `embed_batch` call.
    pub embed_batch_size: usize,
    /// Batches in flight at once.
    pub embed_concurrency: usize,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default(), &RuntimeSettings::default())
    }
}

impl IngestOptions {
    pub fn from_settings(embedding: &EmbeddingSettings, runtime: &RuntimeSettings) -> Self {
        Self {
            embed_batch_size: embedding.batch_size.max(1),
            embed_concurrency: runtime.embed_concurrency.max(1),
            embed_timeout: runtime.embed_timeout(),
            store_timeout: runtime.store_timeout(),
        }
    }
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub filename: String,
    pub collection: String,
    pub chunks: usize,
    pub dimension: usize,
    pub elapsed_ms: u64,
}

pub struct IngestionOrchestrator<S: ChunkStore + ?Sized> {
    embedder: Arc<dyn Embedder>,
    store: Arc<S>,
    options: IngestOptions,
}

impl<S: ChunkStore + ?Sized + 'static> IngestionOrchestrator<S> {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<S>, options: IngestOptions) -> Self {
        Self { embedder, store, options }
    }

    pub fn options(&self) -> &IngestOptions { &self.options }

    /// Chunks, embeds and stores `document`, replacing any chunks previously
    /// stored under its id. On failure the stored state is unchanged and the
    /// error names the stage that failed.
    pub async fn ingest(
        &self,
        collection: &str,
        document: &Document,
        chunking: &ChunkingSettings,
        extra_metadata: &Metadata,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let doc_id = document.id.as_str();
        let fail = |stage: IngestStage| {
            move |e: Error| {
                warn!(doc_id, collection, %stage, error = %e, "ingestion failed");
                Error::ingest(doc_id, stage, e)
            }
        };
        cancel.check().map_err(fail(IngestStage::Received))?;
        debug!(doc_id, collection, filename = %document.filename, "document received");

        let chunker = Chunker::from_settings(chunking).map_err(fail(IngestStage::Chunked))?;
        cancel.check().map_err(fail(IngestStage::Chunked))?;
        let pieces = chunker.split(&document.text);
        debug!(doc_id, chunks = pieces.len(), "document chunked");

        let vectors = self.embed_all(&pieces, cancel).await.map_err(fail(IngestStage::Embedded))?;
        debug!(doc_id, vectors = vectors.len(), "chunks embedded");

        let total_chars = document.text.chars().count();
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedding)| build_chunk(document, piece, embedding, total_chars, extra_metadata))
            .collect();
        let chunk_count = chunks.len();

        // last point where cancellation is honored; the write always runs to completion
        cancel.check().map_err(fail(IngestStage::Stored))?;
        let store = Arc::clone(&self.store);
        let (target, id) = (collection.to_string(), doc_id.to_string());
        detached(
            self.options.store_timeout,
            |d| Error::StoreWriteFailure(format!("write still running after {d:?}; it completes or fails as a whole")),
            async move { store.write(&target, &id, chunks).await },
        )
        .await
        .map_err(fail(IngestStage::Stored))?;

        let report = IngestReport {
            doc_id: doc_id.to_string(),
            filename: document.filename.clone(),
            collection: collection.to_string(),
            chunks: chunk_count,
            dimension: self.embedder.dim(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(doc_id, collection, chunks = report.chunks, elapsed_ms = report.elapsed_ms, "document ingested");
        Ok(report)
    }

    /// Embeds every chunk text, batches running concurrently but reassembled
    /// in chunk order. Checks count and dimension of every vector.
    async fn embed_all(&self, pieces: &[TextChunk], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        if pieces.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = &self.embedder;
        let timeout = self.options.embed_timeout;
        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let batches: Vec<Vec<String>> = texts.chunks(self.options.embed_batch_size).map(<[String]>::to_vec).collect();

        let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| async move {
                let vectors = guarded(
                    cancel,
                    timeout,
                    |d| Error::EmbeddingFailure(format!("embedding timed out after {d:?}")),
                    embedder.embed_batch(&batch),
                )
                .await?;
                if vectors.len() != batch.len() {
                    return Err(Error::EmbeddingFailure(format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok(vectors)
            })
            .buffered(self.options.embed_concurrency)
            .try_collect()
            .await?;

        let dim = embedder.dim();
        let vectors: Vec<Vec<f32>> = per_batch.into_iter().flatten().collect();
        if let Some((i, bad)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(Error::EmbeddingFailure(format!(
                "vector for chunk {i} has dimension {}, embedder '{}' declares {dim}",
                bad.len(),
                embedder.model_id()
            )));
        }
        Ok(vectors)
    }

    /// Removes a document; `false` when nothing was stored under `doc_id`.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let (target, id) = (collection.to_string(), doc_id.to_string());
        let deleted = detached(
            self.options.store_timeout,
            |d| Error::StoreWriteFailure(format!("delete still running after {d:?}")),
            async move { store.delete_document(&target, &id).await },
        )
        .await?;
        info!(collection, doc_id, deleted, "document delete requested");
        Ok(deleted)
    }
}

fn build_chunk(document: &Document, piece: TextChunk, embedding: Vec<f32>, total_chars: usize, extra: &Metadata) -> Chunk {
    let mut metadata = extra.clone();
    metadata.insert("filename".to_string(), MetaValue::from(document.filename.as_str()));
    metadata.insert("created_at".to_string(), MetaValue::from(document.created_at.to_rfc3339()));
    metadata.insert("file_type".to_string(), MetaValue::from(document.file_type()));
    metadata.insert("page_number".to_string(), MetaValue::from(estimate_page(piece.start_char, total_chars)));
    Chunk {
        doc_id: document.id.clone(),
        chunk_index: piece.index,
        text: piece.text,
        embedding,
        start_char: piece.start_char,
        end_char: piece.end_char,
        metadata,
    }
}
