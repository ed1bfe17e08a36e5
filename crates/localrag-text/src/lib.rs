//! localrag-text
//!
//! Tantivy-based keyword scoring for chunk text. The index keeps one row per
//! chunk tagged with the write generation that produced it, which lets stores
//! swap a document's chunk set without readers seeing a mix of two writes.
pub mod index;
pub mod tantivy_utils;

pub use index::{KeywordHit, KeywordIndex, KeywordSnapshot};
