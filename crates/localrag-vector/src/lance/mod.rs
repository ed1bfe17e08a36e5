//! LanceDB-backed chunk store.
//!
//! Each collection owns one chunk table plus an on-disk tantivy index. Rows
//! carry the generation that wrote them; the meta table maps every document
//! to its active generation and that pointer flip is the commit point of a
//! replace. Pointers are cached in process and reloaded on `open`.

mod schema;
mod table;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use localrag_core::error::{Error, Result};
use localrag_core::traits::{ChunkWriter, KeywordSearch, StoreAdmin, VectorSearch};
use localrag_core::types::{Chunk, CollectionStats, DocId, MetadataFilter, Ranked};
use localrag_text::{KeywordIndex, KeywordSnapshot};

use crate::locks::DocLocks;
use crate::similarity::{cosine_similarity, rank_order};
use crate::validate::validate_chunk_set;
use schema::{batch_to_rows, build_chunk_schema, chunks_to_batch, ChunkRow};
use table::{
    delete_meta, ensure_meta_table, ensure_table, open_db, query_err, scan_meta, set_meta, sql_str, table_exists,
    write_err,
};

const COLLECTION_PREFIX: &str = "collection/";

fn active_prefix(collection: &str) -> String { format!("active/{collection}/") }
fn active_key(collection: &str, doc_id: &str) -> String { format!("active/{collection}/{doc_id}") }

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRecord {
    table: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    dimension: Option<usize>,
}

struct LanceCollection {
    name: String,
    record: Mutex<CollectionRecord>,
    active: RwLock<HashMap<DocId, u64>>,
    locks: DocLocks,
    keyword: KeywordIndex,
}

impl LanceCollection {
    fn record(&self) -> CollectionRecord {
        self.record.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn active_snapshot(&self) -> HashMap<DocId, u64> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Pointers and a keyword snapshot taken under one read lock, so every
    /// pointed-at generation still has its keyword rows in the snapshot.
    fn keyword_view(&self) -> (HashMap<DocId, u64>, KeywordSnapshot<'_>) {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        (active.clone(), self.keyword.snapshot())
    }

    fn active_generation(&self, doc_id: &str) -> Option<u64> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).get(doc_id).copied()
    }

    fn claim_dimension(&self, dim: Option<usize>) -> Result<()> {
        let Some(dim) = dim else { return Ok(()) };
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        match record.dimension {
            None => {
                record.dimension = Some(dim);
                Ok(())
            }
            Some(existing) if existing != dim => Err(Error::StoreWriteFailure(format!(
                "collection '{}' stores {existing}-dimensional vectors, got {dim}",
                self.name
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Persistent chunk store under one root directory:
/// `<root>/lance` holds the LanceDB tables, `<root>/keyword/<table>` the
/// tantivy index of each collection.
pub struct LanceChunkStore {
    root: PathBuf,
    conn: Connection,
    collections: tokio::sync::RwLock<HashMap<String, Arc<LanceCollection>>>,
    next_generation: AtomicU64,
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("collection name '{name}' must be non-empty ASCII letters, digits, '_' or '-'")))
    }
}

async fn open_table(conn: &Connection, name: &str) -> Result<Table> {
    conn.open_table(name).execute().await.map_err(query_err)
}

async fn collect_rows(stream: impl futures::Stream<Item = lancedb::Result<arrow_array::RecordBatch>>) -> Result<Vec<ChunkRow>> {
    let batches: Vec<_> = stream.try_collect().await.map_err(query_err)?;
    let mut rows = Vec::new();
    for batch in &batches {
        rows.extend(batch_to_rows(batch)?);
    }
    Ok(rows)
}

/// Chunks of one generation of a document, in index order.
async fn fetch_generation(table: &Table, doc_id: &str, generation: u64) -> Result<Vec<Chunk>> {
    let stream = table
        .query()
        .only_if(format!("doc_id = {} AND generation = {generation}", sql_str(doc_id)))
        .execute()
        .await
        .map_err(query_err)?;
    let mut chunks: Vec<Chunk> = collect_rows(stream).await?.into_iter().map(|r| r.chunk).collect();
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
}

impl LanceChunkStore {
    /// Opens (or initializes) a store rooted at `root` and reloads every
    /// collection's generation pointers.
    pub async fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(write_err)?;
        let conn = open_db(&root.join("lance").to_string_lossy()).await?;
        ensure_meta_table(&conn).await?;

        let mut collections = HashMap::new();
        let mut max_generation = 0u64;
        for (key, value) in scan_meta(&conn, COLLECTION_PREFIX).await? {
            let name = key.trim_start_matches(COLLECTION_PREFIX).to_string();
            let record: CollectionRecord = serde_json::from_str(&value)
                .map_err(|e| Error::StoreQueryFailure(format!("corrupt record for collection '{name}': {e}")))?;
            let mut active = HashMap::new();
            let prefix = active_prefix(&name);
            for (key, value) in scan_meta(&conn, &prefix).await? {
                let generation: u64 = value
                    .parse()
                    .map_err(|e| Error::StoreQueryFailure(format!("corrupt generation pointer '{key}': {e}")))?;
                max_generation = max_generation.max(generation);
                active.insert(key[prefix.len()..].to_string(), generation);
            }
            let keyword = KeywordIndex::open_or_create(&root.join("keyword").join(&record.table))?;
            debug!(collection = %name, documents = active.len(), "collection loaded");
            collections.insert(
                name.clone(),
                Arc::new(LanceCollection {
                    name,
                    record: Mutex::new(record),
                    active: RwLock::new(active),
                    locks: DocLocks::default(),
                    keyword,
                }),
            );
        }
        // generations left behind by an interrupted write must never be reused
        let clock = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
        info!(root = %root.display(), collections = collections.len(), "lance chunk store opened");
        Ok(Self {
            root: root.to_path_buf(),
            conn,
            collections: tokio::sync::RwLock::new(collections),
            next_generation: AtomicU64::new(max_generation.saturating_add(1).max(clock)),
        })
    }

    async fn find(&self, name: &str) -> Option<Arc<LanceCollection>> {
        self.collections.read().await.get(name).cloned()
    }

    async fn collection(&self, name: &str) -> Result<Arc<LanceCollection>> {
        self.find(name).await.ok_or_else(|| Error::NotFound(format!("collection '{name}'")))
    }

    async fn collection_or_create(&self, name: &str) -> Result<Arc<LanceCollection>> {
        validate_name(name)?;
        if let Some(existing) = self.find(name).await {
            return Ok(existing);
        }
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let now = Utc::now();
        let record = CollectionRecord {
            table: format!("chunks_{name}_{}", now.timestamp_millis()),
            created_at: now,
            updated_at: now,
            dimension: None,
        };
        let keyword = KeywordIndex::open_or_create(&self.root.join("keyword").join(&record.table))?;
        self.persist_record(name, &record).await?;
        let created = Arc::new(LanceCollection {
            name: name.to_string(),
            record: Mutex::new(record),
            active: RwLock::new(HashMap::new()),
            locks: DocLocks::default(),
            keyword,
        });
        collections.insert(name.to_string(), Arc::clone(&created));
        debug!(collection = name, "collection created");
        Ok(created)
    }

    async fn persist_record(&self, name: &str, record: &CollectionRecord) -> Result<()> {
        let value = serde_json::to_string(record).map_err(write_err)?;
        set_meta(&self.conn, &format!("{COLLECTION_PREFIX}{name}"), &value).await
    }

    /// Opens the chunk table, or `None` before the first non-empty write.
    async fn chunk_table(&self, coll: &LanceCollection) -> Result<Option<Table>> {
        let name = coll.record().table;
        if table_exists(&self.conn, &name).await? {
            Ok(Some(open_table(&self.conn, &name).await?))
        } else {
            Ok(None)
        }
    }

    /// Writes a new generation, flips the pointer, then drops the old rows.
    /// Caller holds the document lock.
    async fn replace(&self, coll: &LanceCollection, doc_id: &str, dim: Option<usize>, chunks: Vec<Chunk>) -> Result<()> {
        coll.claim_dimension(dim)?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let record = coll.record();
        let staged = match dim {
            Some(dim) => {
                ensure_table(&self.conn, &record.table, build_chunk_schema(dim)?).await?;
                let table = open_table(&self.conn, &record.table).await?;
                let batch = chunks_to_batch(&chunks, generation, dim)?;
                let schema = batch.schema();
                let reader = Box::new(arrow_array::RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
                table.add(reader).execute().await.map_err(write_err)?;
                let indexed = coll.keyword.stage(doc_id, generation, chunks.iter().map(|c| (c.chunk_index, c.text.as_str())));
                if let Err(e) = indexed {
                    self.drop_generation(coll, &table, doc_id, generation).await;
                    return Err(e);
                }
                Some(table)
            }
            None => None,
        };

        let key = active_key(&coll.name, doc_id);
        let flipped = if chunks.is_empty() {
            delete_meta(&self.conn, &format!("key = {}", sql_str(&key))).await
        } else {
            set_meta(&self.conn, &key, &generation.to_string()).await
        };
        if let Err(e) = flipped {
            if let Some(table) = &staged {
                self.drop_generation(coll, table, doc_id, generation).await;
            }
            return Err(e);
        }
        let previous = {
            let mut active = coll.active.write().unwrap_or_else(PoisonError::into_inner);
            if chunks.is_empty() {
                active.remove(doc_id)
            } else {
                active.insert(doc_id.to_string(), generation)
            }
        };
        debug!(collection = %coll.name, doc_id, generation, chunks = chunks.len(), "document replaced");

        let updated = {
            let mut record = coll.record.lock().unwrap_or_else(PoisonError::into_inner);
            record.updated_at = Utc::now();
            record.clone()
        };
        if let Err(e) = self.persist_record(&coll.name, &updated).await {
            warn!(collection = %coll.name, error = %e, "failed to persist collection record");
        }
        if let Some(previous) = previous {
            match staged {
                Some(table) => self.drop_generation(coll, &table, doc_id, previous).await,
                None => {
                    if let Ok(Some(table)) = self.chunk_table(coll).await {
                        self.drop_generation(coll, &table, doc_id, previous).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Best-effort removal of one generation's rows; leftovers are invisible
    /// to readers because no pointer references them.
    async fn drop_generation(&self, coll: &LanceCollection, table: &Table, doc_id: &str, generation: u64) {
        let predicate = format!("doc_id = {} AND generation = {generation}", sql_str(doc_id));
        if let Err(e) = table.delete(&predicate).await {
            warn!(collection = %coll.name, doc_id, generation, error = %e, "failed to drop chunk rows");
        }
        if let Err(e) = coll.keyword.retire(doc_id, generation) {
            warn!(collection = %coll.name, doc_id, generation, error = %e, "failed to retire keyword rows");
        }
    }
}

#[async_trait]
impl VectorSearch for LanceChunkStore {
    async fn vector_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>> {
        let coll = self.collection(collection).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        match coll.record().dimension {
            None => return Ok(Vec::new()),
            Some(dim) if dim != vector.len() => {
                return Err(Error::StoreQueryFailure(format!(
                    "query vector has dimension {}, collection '{collection}' stores {dim}",
                    vector.len()
                )))
            }
            Some(_) => {}
        }
        let active = coll.active_snapshot();
        let Some(table) = self.chunk_table(&coll).await? else { return Ok(Vec::new()) };
        if active.is_empty() {
            return Ok(Vec::new());
        }
        let total = table.count_rows(None).await.map_err(query_err)?;

        // stale rows and the filter both drop candidates; widen until enough survive
        let mut fetch = limit.saturating_mul(2);
        loop {
            let stream = table
                .vector_search(vector.to_vec())
                .map_err(query_err)?
                .distance_type(DistanceType::Cosine)
                .limit(fetch)
                .execute()
                .await
                .map_err(query_err)?;
            let rows = collect_rows(stream).await?;
            let returned = rows.len();
            let mut ranked: Vec<Ranked> = rows
                .into_iter()
                .filter(|r| active.get(&r.chunk.doc_id) == Some(&r.generation))
                .filter(|r| filter.matches(&r.chunk))
                .filter_map(|r| {
                    cosine_similarity(vector, &r.chunk.embedding).map(|score| Ranked { chunk: Arc::new(r.chunk), score })
                })
                .collect();
            if ranked.len() >= limit || returned < fetch || fetch >= total {
                ranked.sort_by(rank_order);
                ranked.truncate(limit);
                return Ok(ranked);
            }
            fetch = fetch.saturating_mul(2);
        }
    }
}

#[async_trait]
impl KeywordSearch for LanceChunkStore {
    async fn keyword_search(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Ranked>> {
        let coll = self.collection(collection).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (active, keyword) = coll.keyword_view();
        let Some(table) = self.chunk_table(&coll).await? else { return Ok(Vec::new()) };
        let fetch = usize::try_from(keyword.num_docs()).unwrap_or(usize::MAX);
        let mut loaded: HashMap<DocId, Vec<Arc<Chunk>>> = HashMap::new();
        let mut ranked = Vec::new();
        for hit in keyword.search(text, fetch)? {
            if active.get(&hit.doc_id) != Some(&hit.generation) {
                continue;
            }
            // hits arrive by descending score; keep collecting ties for a stable order
            if ranked.len() >= limit && ranked.last().is_some_and(|r: &Ranked| hit.score < r.score) {
                break;
            }
            if !loaded.contains_key(&hit.doc_id) {
                let chunks = fetch_generation(&table, &hit.doc_id, hit.generation).await?;
                loaded.insert(hit.doc_id.clone(), chunks.into_iter().map(Arc::new).collect());
            }
            let Some(chunk) = loaded.get(&hit.doc_id).and_then(|c| c.get(hit.chunk_index)) else { continue };
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
impl ChunkWriter for LanceChunkStore {
    async fn write(&self, collection: &str, doc_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let dim = validate_chunk_set(doc_id, &chunks)?;
        let coll = self.collection_or_create(collection).await?;
        coll.locks.run(doc_id, self.replace(&coll, doc_id, dim, chunks)).await
    }

    async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let Some(coll) = self.find(collection).await else { return Ok(false) };
        coll.locks
            .run(doc_id, async {
                let Some(generation) = coll.active_generation(doc_id) else { return Ok(false) };
                delete_meta(&self.conn, &format!("key = {}", sql_str(&active_key(collection, doc_id)))).await?;
                coll.active.write().unwrap_or_else(PoisonError::into_inner).remove(doc_id);
                if let Some(table) = self.chunk_table(&coll).await? {
                    self.drop_generation(&coll, &table, doc_id, generation).await;
                }
                debug!(collection, doc_id, "document deleted");
                Ok(true)
            })
            .await
    }
}

#[async_trait]
impl StoreAdmin for LanceChunkStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        self.collection_or_create(name).await.map(|_| ())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let coll = self.collection(name).await?;
        let record = coll.record();
        let chunks = match self.chunk_table(&coll).await? {
            Some(table) => table.count_rows(None).await.map_err(query_err)?,
            None => 0,
        };
        Ok(CollectionStats {
            name: coll.name.clone(),
            documents: coll.active_snapshot().len(),
            chunks,
            dimension: record.dimension,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let coll = self
            .collections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("collection '{name}'")))?;
        let predicate = format!(
            "key = {} OR key LIKE {}",
            sql_str(&format!("{COLLECTION_PREFIX}{name}")),
            sql_str(&format!("{}%", active_prefix(name)))
        );
        delete_meta(&self.conn, &predicate).await?;
        // the table name is unique per incarnation, so a recreated collection never sees these rows
        if let Some(table) = self.chunk_table(&coll).await? {
            if let Err(e) = table.delete("true").await {
                warn!(collection = name, error = %e, "failed to clear chunk table");
            }
        }
        if let Err(e) = coll.keyword.clear() {
            warn!(collection = name, error = %e, "failed to clear keyword index");
        }
        debug!(collection = name, "collection deleted");
        Ok(())
    }

    async fn get_document(&self, collection: &str, doc_id: &str) -> Result<Vec<Arc<Chunk>>> {
        let coll = self.collection(collection).await?;
        let not_found = || Error::NotFound(format!("document '{doc_id}' in collection '{collection}'"));
        let generation = coll.active_generation(doc_id).ok_or_else(not_found)?;
        let table = self.chunk_table(&coll).await?.ok_or_else(not_found)?;
        Ok(fetch_generation(&table, doc_id, generation).await?.into_iter().map(Arc::new).collect())
    }
}
