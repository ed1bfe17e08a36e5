//! localrag-core
//!
//! Domain types, the error taxonomy, configuration, the chunker and the
//! collaborator traits (embedder, chunk store) shared by every other crate.

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use chunker::{chunk, Chunker, TextChunk};
pub use error::{Error, ErrorKind, IngestStage, Result, Signal};
