//! In-process chunk store.
//!
//! Every document points at an immutable slot holding one generation of its
//! chunks. A write builds the new slot, stages its keyword rows, then swaps the
//! pointer; the previous generation's keyword rows are retired afterwards.
//! Readers take the pointers and a keyword snapshot together and ignore rows of
//! any other generation, so they see either the old chunk set or the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use localrag_core::error::{Error, Result};
use localrag_core::traits::{ChunkWriter, KeywordSearch, StoreAdmin, VectorSearch};
use localrag_core::types::{Chunk, CollectionStats, DocId, MetadataFilter, Ranked};
use localrag_text::{KeywordIndex, KeywordSnapshot};

use crate::locks::DocLocks;
use crate::similarity::{cosine_similarity, rank_order};
use crate::validate::validate_chunk_set;

struct Slot {
    generation: u64,
    chunks: Vec<Arc<Chunk>>,
}

struct Collection {
    name: String,
    created_at: DateTime<Utc>,
    updated_at: Mutex<DateTime<Utc>>,
    dimension: Mutex<Option<usize>>,
    active: RwLock<HashMap<DocId, Arc<Slot>>>,
    locks: DocLocks,
    keyword: KeywordIndex,
}

impl Collection {
    fn new(name: &str) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            name: name.to_string(),
            created_at: now,
            updated_at: Mutex::new(now),
            dimension: Mutex::new(None),
            active: RwLock::new(HashMap::new()),
            locks: DocLocks::default(),
            keyword: KeywordIndex::in_memory()?,
        })
    }

    fn slots(&self) -> Vec<Arc<Slot>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Pointers plus a keyword snapshot taken under one read lock. `replace`
    /// swaps only after staging and retires only after the swap, so every
    /// generation the pointers name has its rows in the snapshot.
    fn view(&self) -> (HashMap<DocId, Arc<Slot>>, KeywordSnapshot<'_>) {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        (active.clone(), self.keyword.snapshot())
    }

    fn dimension(&self) -> Option<usize> {
        *self.dimension.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fixes the collection dimension on first use and rejects mismatches after.
    fn claim_dimension(&self, dim: Option<usize>) -> Result<()> {
        let Some(dim) = dim else { return Ok(()) };
        let mut current = self.dimension.lock().unwrap_or_else(PoisonError::into_inner);
        match *current {
            None => {
                *current = Some(dim);
                Ok(())
            }
            Some(existing) if existing != dim => Err(Error::StoreWriteFailure(format!(
                "collection '{}' stores {existing}-dimensional vectors, got {dim}",
                self.name
            ))),
            Some(_) => Ok(()),
        }
    }

    fn touch(&self) {
        *self.updated_at.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Replaces the active generation of `doc_id`. Caller holds the document lock.
    fn replace(&self, doc_id: &str, generation: u64, chunks: Vec<Chunk>) -> Result<()> {
        let slot = Arc::new(Slot { generation, chunks: chunks.into_iter().map(Arc::new).collect() });
        if !slot.chunks.is_empty() {
            self.keyword
                .stage(doc_id, generation, slot.chunks.iter().map(|c| (c.chunk_index, c.text.as_str())))?;
        }
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            if slot.chunks.is_empty() {
                active.remove(doc_id)
            } else {
                active.insert(doc_id.to_string(), Arc::clone(&slot))
            }
        };
        self.touch();
        debug!(collection = %self.name, doc_id, generation, chunks = slot.chunks.len(), "document replaced");
        if let Some(previous) = previous {
            // stale rows are already invisible to readers; a failed retire only leaks them
            if let Err(e) = self.keyword.retire(doc_id, previous.generation) {
                warn!(collection = %self.name, doc_id, generation = previous.generation, error = %e, "failed to retire keyword rows");
            }
        }
        Ok(())
    }
}

/// Chunk store kept entirely in memory: brute-force cosine search plus a
/// RAM-backed tantivy index per collection.
pub struct MemoryChunkStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    next_generation: AtomicU64,
}

impl Default for MemoryChunkStore {
    fn default() -> Self { Self::new() }
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self { collections: RwLock::new(HashMap::new()), next_generation: AtomicU64::new(1) }
    }

    fn find(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.find(name).ok_or_else(|| Error::NotFound(format!("collection '{name}'")))
    }

    fn collection_or_create(&self, name: &str) -> Result<Arc<Collection>> {
        if name.trim().is_empty() {
            return Err(Error::InvalidConfig("collection name must not be empty".to_string()));
        }
        if let Some(existing) = self.find(name) {
            return Ok(existing);
        }
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let created = Arc::new(Collection::new(name)?);
        collections.insert(name.to_string(), Arc::clone(&created));
        debug!(collection = name, "collection created");
        Ok(created)
    }
}

#[async_trait]
impl VectorSearch for MemoryChunkStore {
    async fn vector_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>> {
        let coll = self.collection(collection)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        match coll.dimension() {
            None => return Ok(Vec::new()),
            Some(dim) if dim != vector.len() => {
                return Err(Error::StoreQueryFailure(format!(
                    "query vector has dimension {}, collection '{collection}' stores {dim}",
                    vector.len()
                )))
            }
            Some(_) => {}
        }
        let mut ranked: Vec<Ranked> = coll
            .slots()
            .iter()
            .flat_map(|slot| slot.chunks.iter())
            .filter(|chunk| filter.matches(chunk))
            .filter_map(|chunk| {
                cosine_similarity(vector, &chunk.embedding).map(|score| Ranked { chunk: Arc::clone(chunk), score })
            })
            .collect();
        ranked.sort_by(rank_order);
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[async_trait]
impl KeywordSearch for MemoryChunkStore {
    async fn keyword_search(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>> {
        let coll = self.collection(collection)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (active, keyword) = coll.view();
        // fetch every matching row: stale generations and the filter both drop hits
        let fetch = usize::try_from(keyword.num_docs()).unwrap_or(usize::MAX);
        let mut ranked = Vec::new();
        for hit in keyword.search(text, fetch)? {
            let Some(slot) = active.get(&hit.doc_id) else { continue };
            if slot.generation != hit.generation {
                continue;
            }
            let Some(chunk) = slot.chunks.get(hit.chunk_index) else { continue };
            if filter.matches(chunk) {
                ranked.push(Ranked { chunk: Arc::clone(chunk), score: hit.score });
            }
        }
        ranked.sort_by(rank_order);
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[async_trait]
impl ChunkWriter for MemoryChunkStore {
    async fn write(&self, collection: &str, doc_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let dim = validate_chunk_set(doc_id, &chunks)?;
        let coll = self.collection_or_create(collection)?;
        coll.locks
            .run(doc_id, async {
                coll.claim_dimension(dim)?;
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                coll.replace(doc_id, generation, chunks)
            })
            .await
    }

    async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let Some(coll) = self.find(collection) else { return Ok(false) };
        let removed = coll
            .locks
            .run(doc_id, async {
                let removed = coll.active.write().unwrap_or_else(PoisonError::into_inner).remove(doc_id);
                if removed.is_some() {
                    coll.touch();
                    if let Err(e) = coll.keyword.remove_document(doc_id) {
                        warn!(collection, doc_id, error = %e, "failed to drop keyword rows");
                    }
                    debug!(collection, doc_id, "document deleted");
                }
                removed.is_some()
            })
            .await;
        Ok(removed)
    }
}

#[async_trait]
impl StoreAdmin for MemoryChunkStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        self.collection_or_create(name).map(|_| ())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> =
            self.collections.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let coll = self.collection(name)?;
        let slots = coll.slots();
        let updated_at = *coll.updated_at.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(CollectionStats {
            name: coll.name.clone(),
            documents: slots.len(),
            chunks: slots.iter().map(|s| s.chunks.len()).sum(),
            dimension: coll.dimension(),
            created_at: coll.created_at,
            updated_at,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let removed = self.collections.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        match removed {
            Some(_) => {
                debug!(collection = name, "collection deleted");
                Ok(())
            }
            None => Err(Error::NotFound(format!("collection '{name}'"))),
        }
    }

    async fn get_document(&self, collection: &str, doc_id: &str) -> Result<Vec<Arc<Chunk>>> {
        let coll = self.collection(collection)?;
        let slot = coll.active.read().unwrap_or_else(PoisonError::into_inner).get(doc_id).cloned();
        slot.map(|s| s.chunks.clone())
            .ok_or_else(|| Error::NotFound(format!("document '{doc_id}' in collection '{collection}'")))
    }
}
