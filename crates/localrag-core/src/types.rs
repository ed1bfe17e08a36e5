//! Domain types shared by the chunker, stores and orchestrators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type DocId = String;
pub type Metadata = BTreeMap<String, MetaValue>;

/// Metadata key that filters match against `Chunk::doc_id` instead of the map.
pub const DOC_ID_KEY: &str = "doc_id";

/// A scalar metadata value attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// Exact-match comparison; integers and floats compare numerically.
    pub fn matches(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            _ => self == other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self { Self::Text(v.to_string()) }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self { Self::Text(v) }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self { Self::Int(i64::try_from(v).unwrap_or(i64::MAX)) }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

/// A source document handed over by the text extraction collaborator.
///
/// `id` is caller-supplied or derived from filename and text, so re-ingesting
/// identical content targets the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub filename: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        let filename = filename.into();
        let text = text.into();
        let id = content_id(&filename, &text);
        Self { id, filename, text, created_at: Utc::now() }
    }

    pub fn with_id(id: impl Into<String>, filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), filename: filename.into(), text: text.into(), created_at: Utc::now() }
    }

    /// Lowercase file extension, `txt` when the name has none.
    pub fn file_type(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map_or_else(|| "txt".to_string(), str::to_lowercase)
    }
}

fn content_id(filename: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(filename.as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// Identity of a chunk across result lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub doc_id: DocId,
    pub chunk_index: usize,
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.chunk_index)
    }
}

/// A stored slice of a document with its embedding.
///
/// - `chunk_index`: 0-based position, contiguous within the document
/// - `start_char`/`end_char`: char window in the source text (before trimming)
/// - `metadata`: scalar values used by filters and citations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: DocId,
    pub chunk_index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey { doc_id: self.doc_id.clone(), chunk_index: self.chunk_index }
    }
}

/// Exact-match predicate over chunk metadata. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, MetaValue>);

impl MetadataFilter {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.0.iter().all(|(key, want)| {
            if key == DOC_ID_KEY {
                return want.as_str() == Some(chunk.doc_id.as_str());
            }
            chunk.metadata.get(key).is_some_and(|have| have.matches(want))
        })
    }

    /// Builds a filter from a flat JSON object of scalars.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidConfig("filter must be a JSON object".to_string()))?;
        let mut filter = Self::new();
        for (key, v) in obj {
            let mv = match v {
                serde_json::Value::Bool(b) => MetaValue::Bool(*b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => MetaValue::Int(i),
                    None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                serde_json::Value::String(s) => MetaValue::Text(s.clone()),
                other => {
                    return Err(Error::InvalidConfig(format!("filter value for '{key}' is not a scalar: {other}")))
                }
            };
            filter.0.insert(key.clone(), mv);
        }
        Ok(filter)
    }
}

/// One store hit: the chunk and the signal's raw score (higher is better).
#[derive(Debug, Clone)]
pub struct Ranked {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

/// A chunk with both raw signal scores and its fused score. Query-scoped.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub normalized_vector: f32,
    pub normalized_keyword: f32,
    pub score: f32,
}

/// Which signals a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Vector,
    Keyword,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hybrid => "hybrid",
            Self::Vector => "vector",
            Self::Keyword => "keyword",
        })
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "vector" => Ok(Self::Vector),
            "keyword" | "text" => Ok(Self::Keyword),
            other => Err(Error::InvalidConfig(format!("unknown search mode '{other}'"))),
        }
    }
}

/// Source reference for a result chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub document_id: DocId,
    pub filename: String,
    pub chunk_index: usize,
    pub page_number: Option<i64>,
    pub start_char: usize,
    pub end_char: usize,
    pub document_type: Option<String>,
    pub ingestion_date: Option<String>,
}

impl Citation {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let text = |key: &str| chunk.metadata.get(key).and_then(MetaValue::as_str).map(str::to_string);
        Self {
            document_id: chunk.doc_id.clone(),
            filename: text("filename").unwrap_or_else(|| "Unknown".to_string()),
            chunk_index: chunk.chunk_index,
            page_number: chunk.metadata.get("page_number").and_then(MetaValue::as_i64),
            start_char: chunk.start_char,
            end_char: chunk.end_char,
            document_type: text("file_type"),
            ingestion_date: text("created_at"),
        }
    }
}

/// Administrative view of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
