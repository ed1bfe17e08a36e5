//! Chunk store implementations.
//!
//! `MemoryChunkStore` keeps everything in process and backs the CLI and the
//! tests. `LanceChunkStore` (feature `lance`) persists chunks in LanceDB with
//! an on-disk tantivy index next to it. Both replace a document's chunk set
//! atomically with respect to readers.

mod locks;
pub mod memory;
pub mod similarity;
pub mod validate;

#[cfg(feature = "lance")]
pub mod lance;

#[cfg(feature = "lance")]
pub use lance::LanceChunkStore;
pub use memory::MemoryChunkStore;
pub use similarity::cosine_similarity;
