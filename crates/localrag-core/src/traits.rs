use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Chunk, CollectionStats, MetadataFilter, Ranked};

/// Opaque text → vector function with a fixed output dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hash:d384`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Must return the same vectors as calling `embed` per item.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Cosine-similarity ranking over stored chunk vectors.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn vector_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>>;
}

/// Lexical relevance ranking over stored chunk text.
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    async fn keyword_search(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>>;
}

#[async_trait]
pub trait ChunkWriter: Send + Sync {
    /// Atomically replaces every chunk of `doc_id`. `chunks` must be sorted by
    /// index starting at 0.
    async fn write(&self, collection: &str, doc_id: &str, chunks: Vec<Chunk>) -> Result<()>;
    /// Returns `false` when nothing was stored for `doc_id`.
    async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait StoreAdmin: Send + Sync {
    async fn create_collection(&self, name: &str) -> Result<()>;
    async fn list_collections(&self) -> Result<Vec<String>>;
    async fn collection_stats(&self, name: &str) -> Result<CollectionStats>;
    async fn delete_collection(&self, name: &str) -> Result<()>;
    /// Active chunks of one document in index order.
    async fn get_document(&self, collection: &str, doc_id: &str) -> Result<Vec<Arc<Chunk>>>;
}

/// Everything the orchestrators need from persistence.
pub trait ChunkStore: VectorSearch + KeywordSearch + ChunkWriter + StoreAdmin {}

impl<T> ChunkStore for T where T: VectorSearch + KeywordSearch + ChunkWriter + StoreAdmin {}
