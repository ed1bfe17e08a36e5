use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage an ingestion was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    Chunked,
    Embedded,
    Stored,
    Complete,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Chunked => "chunked",
            Self::Embedded => "embedded",
            Self::Stored => "stored",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Which part of a query produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Embedding,
    Vector,
    Keyword,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Embedding => "embedding",
            Self::Vector => "vector search",
            Self::Keyword => "keyword search",
        };
        f.write_str(s)
    }
}

/// Root failure categories, stable across the orchestrator wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    EmbeddingFailure,
    StoreWriteFailure,
    StoreQueryFailure,
    NotFound,
    Cancelled,
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Store write failed: {0}")]
    StoreWriteFailure(String),

    #[error("Store query failed: {0}")]
    StoreQueryFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion of '{doc_id}' failed at stage {stage}: {source}")]
    Ingest {
        doc_id: String,
        stage: IngestStage,
        #[source]
        source: Box<Error>,
    },

    #[error("Query failed in {signal}: {source}")]
    QueryFailed {
        signal: Signal,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Taxonomy kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::EmbeddingFailure(_) => ErrorKind::EmbeddingFailure,
            Self::StoreWriteFailure(_) => ErrorKind::StoreWriteFailure,
            Self::StoreQueryFailure(_) => ErrorKind::StoreQueryFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Ingest { source, .. } | Self::QueryFailed { source, .. } => source.kind(),
        }
    }

    pub fn ingest(doc_id: impl Into<String>, stage: IngestStage, source: Error) -> Self {
        Self::Ingest { doc_id: doc_id.into(), stage, source: Box::new(source) }
    }

    pub fn query(signal: Signal, source: Error) -> Self {
        Self::QueryFailed { signal, source: Box::new(source) }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
