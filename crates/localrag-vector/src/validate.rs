use localrag_core::error::{Error, Result};
use localrag_core::types::Chunk;

/// Checks a replacement chunk set before it touches any index and returns the
/// shared embedding dimension (`None` for an empty set).
pub fn validate_chunk_set(doc_id: &str, chunks: &[Chunk]) -> Result<Option<usize>> {
    let mut dim = None;
    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.doc_id != doc_id {
            return Err(Error::StoreWriteFailure(format!(
                "chunk {position} belongs to '{}', expected '{doc_id}'",
                chunk.doc_id
            )));
        }
        if chunk.chunk_index != position {
            return Err(Error::StoreWriteFailure(format!(
                "chunk indices of '{doc_id}' must be contiguous from 0, found {} at position {position}",
                chunk.chunk_index
            )));
        }
        if chunk.embedding.is_empty() {
            return Err(Error::StoreWriteFailure(format!("chunk {} of '{doc_id}' has no embedding", chunk.key())));
        }
        match dim {
            None => dim = Some(chunk.embedding.len()),
            Some(d) if d != chunk.embedding.len() => {
                return Err(Error::StoreWriteFailure(format!(
                    "chunk {} has dimension {}, expected {d}",
                    chunk.key(),
                    chunk.embedding.len()
                )))
            }
            Some(_) => {}
        }
    }
    Ok(dim)
}
