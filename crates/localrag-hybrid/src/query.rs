//! Query path: embed the query, run vector and keyword search concurrently,
//! fuse the two rankings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use localrag_core::config::{RuntimeSettings, SearchSettings};
use localrag_core::error::{Error, Result, Signal};
use localrag_core::traits::{ChunkStore, Embedder};
use localrag_core::types::{Citation, Metadata, MetadataFilter, Ranked, ScoredChunk, SearchMode};
use localrag_core::CancelToken;

use crate::fusion::{fuse_with, validate_weight, AbsentSignal, FusionOptions};
use crate::guard::guarded;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_WEIGHT: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub collection: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Share of the vector signal in the fused score; ignored outside hybrid mode.
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default)]
    pub filter: MetadataFilter,
    #[serde(default)]
    pub mode: SearchMode,
    /// Vector hits scoring below this are dropped before fusion.
    #[serde(default)]
    pub min_vector_score: Option<f32>,
}

fn default_limit() -> usize { DEFAULT_LIMIT }
fn default_weight() -> f32 { DEFAULT_WEIGHT }

impl SearchRequest {
    pub fn new(query: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            limit: DEFAULT_LIMIT,
            weight: DEFAULT_WEIGHT,
            filter: MetadataFilter::default(),
            mode: SearchMode::Hybrid,
            min_vector_score: None,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_min_vector_score(mut self, min: f32) -> Self {
        self.min_vector_score = Some(min);
        self
    }

    /// Weight actually used for fusion: single-signal modes pin it to 1 or 0.
    pub fn effective_weight(&self) -> f32 {
        match self.mode {
            SearchMode::Hybrid => self.weight,
            SearchMode::Vector => 1.0,
            SearchMode::Keyword => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Each signal fetches `limit * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    pub max_limit: usize,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
    pub absent: AbsentSignal,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default(), &RuntimeSettings::default())
    }
}

impl QueryOptions {
    pub fn from_settings(search: &SearchSettings, runtime: &RuntimeSettings) -> Self {
        Self {
            candidate_multiplier: search.candidate_multiplier.max(1),
            max_limit: search.max_limit,
            embed_timeout: runtime.embed_timeout(),
            store_timeout: runtime.store_timeout(),
            absent: AbsentSignal::Zero,
        }
    }
}

/// One ranked result with its source reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub normalized_vector: f32,
    pub normalized_keyword: f32,
    pub metadata: Metadata,
    pub citation: Citation,
}

impl From<ScoredChunk> for SearchHit {
    fn from(s: ScoredChunk) -> Self {
        Self {
            doc_id: s.chunk.doc_id.clone(),
            chunk_index: s.chunk.chunk_index,
            text: s.chunk.text.clone(),
            score: s.score,
            vector_score: s.vector_score,
            keyword_score: s.keyword_score,
            normalized_vector: s.normalized_vector,
            normalized_keyword: s.normalized_keyword,
            metadata: s.chunk.metadata.clone(),
            citation: Citation::from_chunk(&s.chunk),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub collection: String,
    pub mode: SearchMode,
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub elapsed_ms: u64,
}

pub struct QueryOrchestrator<S: ChunkStore + ?Sized> {
    embedder: Arc<dyn Embedder>,
    store: Arc<S>,
    options: QueryOptions,
}

/// Store errors that describe the request rather than the signal pass through.
fn wrap(signal: Signal) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::NotFound(_) | Error::Cancelled => e,
        other => Error::query(signal, other),
    }
}

impl<S: ChunkStore + ?Sized> QueryOrchestrator<S> {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<S>, options: QueryOptions) -> Self {
        Self { embedder, store, options }
    }

    pub fn options(&self) -> &QueryOptions { &self.options }

    fn validate(&self, req: &SearchRequest) -> Result<()> {
        if req.query.trim().is_empty() {
            return Err(Error::InvalidConfig("query must not be empty".to_string()));
        }
        if req.limit == 0 || req.limit > self.options.max_limit {
            return Err(Error::InvalidConfig(format!(
                "limit must be in 1..={}, got {}",
                self.options.max_limit, req.limit
            )));
        }
        validate_weight(req.weight)
    }

    async fn embed_query(&self, query: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        let vector = guarded(
            cancel,
            self.options.embed_timeout,
            |d| Error::EmbeddingFailure(format!("query embedding timed out after {d:?}")),
            self.embedder.embed(query),
        )
        .await
        .map_err(wrap(Signal::Embedding))?;
        if vector.len() != self.embedder.dim() {
            return Err(Error::query(
                Signal::Embedding,
                Error::EmbeddingFailure(format!(
                    "query vector has dimension {}, embedder declares {}",
                    vector.len(),
                    self.embedder.dim()
                )),
            ));
        }
        Ok(vector)
    }

    async fn vector_candidates(
        &self,
        req: &SearchRequest,
        vector: &[f32],
        fetch: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<Ranked>> {
        let mut hits = guarded(
            cancel,
            self.options.store_timeout,
            |d| Error::StoreQueryFailure(format!("vector search timed out after {d:?}")),
            self.store.vector_search(&req.collection, vector, fetch, &req.filter),
        )
        .await
        .map_err(wrap(Signal::Vector))?;
        if let Some(min) = req.min_vector_score {
            hits.retain(|h| h.score >= min);
        }
        Ok(hits)
    }

    async fn keyword_candidates(&self, req: &SearchRequest, fetch: usize, cancel: &CancelToken) -> Result<Vec<Ranked>> {
        guarded(
            cancel,
            self.options.store_timeout,
            |d| Error::StoreQueryFailure(format!("keyword search timed out after {d:?}")),
            self.store.keyword_search(&req.collection, &req.query, fetch, &req.filter),
        )
        .await
        .map_err(wrap(Signal::Keyword))
    }

    /// Runs one search. Any failing signal fails the whole query; there is no
    /// single-signal fallback.
    pub async fn search(&self, req: &SearchRequest, cancel: &CancelToken) -> Result<SearchResponse> {
        let started = Instant::now();
        self.validate(req)?;
        cancel.check()?;
        let fetch = req.limit.saturating_mul(self.options.candidate_multiplier);
        debug!(collection = %req.collection, mode = %req.mode, fetch, "search started");

        let outcome = match req.mode {
            SearchMode::Hybrid => {
                let vector = self.embed_query(&req.query, cancel).await?;
                futures::try_join!(
                    self.vector_candidates(req, &vector, fetch, cancel),
                    self.keyword_candidates(req, fetch, cancel),
                )
            }
            SearchMode::Vector => {
                let vector = self.embed_query(&req.query, cancel).await?;
                self.vector_candidates(req, &vector, fetch, cancel).await.map(|v| (v, Vec::new()))
            }
            SearchMode::Keyword => self.keyword_candidates(req, fetch, cancel).await.map(|k| (Vec::new(), k)),
        };
        let (vector_hits, keyword_hits) = outcome.inspect_err(|e| {
            warn!(collection = %req.collection, error = %e, "search failed");
        })?;

        let opts = FusionOptions::new(req.effective_weight(), req.limit).with_absent(self.options.absent);
        let fused = fuse_with(&vector_hits, &keyword_hits, &opts)?;
        let results: Vec<SearchHit> = fused.into_iter().map(SearchHit::from).collect();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            collection = %req.collection,
            mode = %req.mode,
            vector_hits = vector_hits.len(),
            keyword_hits = keyword_hits.len(),
            results = results.len(),
            elapsed_ms,
            "search finished"
        );
        Ok(SearchResponse {
            query: req.query.clone(),
            collection: req.collection.clone(),
            mode: req.mode,
            total: results.len(),
            results,
            elapsed_ms,
        })
    }
}
