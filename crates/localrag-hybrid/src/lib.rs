//! Hybrid retrieval: ingestion and query orchestration over an embedder and a
//! chunk store, and the fusion of vector and keyword rankings.

pub mod fusion;
mod guard;
pub mod ingest;
pub mod query;

use std::sync::Arc;

use localrag_core::config::{ChunkingSettings, Settings};
use localrag_core::error::Result;
use localrag_core::traits::{ChunkStore, Embedder};
use localrag_core::types::{Chunk, CollectionStats, Document, Metadata};
use localrag_core::CancelToken;

pub use fusion::{fuse, fuse_with, AbsentSignal, FusionOptions};
pub use ingest::{IngestOptions, IngestReport, IngestionOrchestrator};
pub use query::{QueryOptions, QueryOrchestrator, SearchHit, SearchRequest, SearchResponse};

/// Both orchestrators over one embedder and one store.
pub struct HybridSearchEngine<S: ChunkStore + ?Sized> {
    store: Arc<S>,
    ingestion: IngestionOrchestrator<S>,
    query: QueryOrchestrator<S>,
}

impl<S: ChunkStore + ?Sized + 'static> HybridSearchEngine<S> {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<S>, ingest: IngestOptions, query: QueryOptions) -> Self {
        Self {
            ingestion: IngestionOrchestrator::new(Arc::clone(&embedder), Arc::clone(&store), ingest),
            query: QueryOrchestrator::new(embedder, Arc::clone(&store), query),
            store,
        }
    }

    pub fn from_settings(embedder: Arc<dyn Embedder>, store: Arc<S>, settings: &Settings) -> Self {
        Self::new(
            embedder,
            store,
            IngestOptions::from_settings(&settings.embedding, &settings.runtime),
            QueryOptions::from_settings(&settings.search, &settings.runtime),
        )
    }

    pub fn store(&self) -> &Arc<S> { &self.store }

    pub async fn ingest(
        &self,
        collection: &str,
        document: &Document,
        chunking: &ChunkingSettings,
        extra_metadata: &Metadata,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        self.ingestion.ingest(collection, document, chunking, extra_metadata, cancel).await
    }

    pub async fn search(&self, request: &SearchRequest, cancel: &CancelToken) -> Result<SearchResponse> {
        self.query.search(request, cancel).await
    }

    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<bool> {
        self.ingestion.delete_document(collection, doc_id).await
    }

    pub async fn get_document(&self, collection: &str, doc_id: &str) -> Result<Vec<Arc<Chunk>>> {
        self.store.get_document(collection, doc_id).await
    }

    pub async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        self.store.collection_stats(collection).await
    }
}
