use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int64Type, UInt64Type};
use arrow_array::{Array, FixedSizeListArray, Int64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field, Schema};

use localrag_core::error::{Error, Result};
use localrag_core::types::{Chunk, Metadata};

/// Chunk rows as stored in a collection table. One row per chunk per generation.
pub fn build_chunk_schema(dim: usize) -> Result<Arc<Schema>> {
    let dim = schema_dim(dim)?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("generation", DataType::UInt64, false),
        Field::new("chunk_index", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("start_char", DataType::Int64, false),
        Field::new("end_char", DataType::Int64, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ])))
}

fn as_i64(v: usize) -> i64 { i64::try_from(v).unwrap_or(i64::MAX) }

pub fn chunks_to_batch(chunks: &[Chunk], generation: u64, dim: usize) -> Result<RecordBatch> {
    let schema = build_chunk_schema(dim)?;
    let mut metadata = Vec::with_capacity(chunks.len());
    for c in chunks {
        metadata.push(
            serde_json::to_string(&c.metadata).map_err(|e| Error::StoreWriteFailure(format!("metadata of {}: {e}", c.key())))?,
        );
    }
    let vectors = chunks.iter().map(|c| Some(c.embedding.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.doc_id.as_str()))),
        Arc::new(UInt64Array::from(vec![generation; chunks.len()])),
        Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| as_i64(c.chunk_index)))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
        Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| as_i64(c.start_char)))),
        Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| as_i64(c.end_char)))),
        Arc::new(StringArray::from(metadata)),
        Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, schema_dim(dim)?)),
    ];
    RecordBatch::try_new(schema, columns).map_err(|e| Error::StoreWriteFailure(format!("building record batch: {e}")))
}

fn schema_dim(dim: usize) -> Result<i32> {
    i32::try_from(dim).map_err(|_| Error::StoreWriteFailure(format!("dimension {dim} too large")))
}

/// A decoded row: its generation plus the chunk.
pub struct ChunkRow {
    pub generation: u64,
    pub chunk: Chunk,
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Arc<dyn Array>> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::StoreQueryFailure(format!("chunk table has no '{name}' column")))
}

fn to_usize(v: i64) -> usize { usize::try_from(v).unwrap_or_default() }

pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<ChunkRow>> {
    let bad = |name: &str| Error::StoreQueryFailure(format!("unexpected type for column '{name}'"));
    let doc_ids = column(batch, "doc_id")?.as_string_opt::<i32>().ok_or_else(|| bad("doc_id"))?;
    let generations = column(batch, "generation")?.as_primitive_opt::<UInt64Type>().ok_or_else(|| bad("generation"))?;
    let indices = column(batch, "chunk_index")?.as_primitive_opt::<Int64Type>().ok_or_else(|| bad("chunk_index"))?;
    let texts = column(batch, "text")?.as_string_opt::<i32>().ok_or_else(|| bad("text"))?;
    let starts = column(batch, "start_char")?.as_primitive_opt::<Int64Type>().ok_or_else(|| bad("start_char"))?;
    let ends = column(batch, "end_char")?.as_primitive_opt::<Int64Type>().ok_or_else(|| bad("end_char"))?;
    let metas = column(batch, "metadata")?.as_string_opt::<i32>().ok_or_else(|| bad("metadata"))?;
    let vectors = column(batch, "vector")?.as_fixed_size_list_opt().ok_or_else(|| bad("vector"))?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let metadata: Metadata = serde_json::from_str(metas.value(i))
            .map_err(|e| Error::StoreQueryFailure(format!("corrupt metadata for '{}': {e}", doc_ids.value(i))))?;
        let embedding = if vectors.is_valid(i) {
            vectors.value(i).as_primitive_opt::<Float32Type>().map(|a| a.values().to_vec()).unwrap_or_default()
        } else {
            Vec::new()
        };
        rows.push(ChunkRow {
            generation: generations.value(i),
            chunk: Chunk {
                doc_id: doc_ids.value(i).to_string(),
                chunk_index: to_usize(indices.value(i)),
                text: texts.value(i).to_string(),
                embedding,
                start_char: to_usize(starts.value(i)),
                end_char: to_usize(ends.value(i)),
                metadata,
            },
        });
    }
    Ok(rows)
}
