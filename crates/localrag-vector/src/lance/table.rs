//! LanceDB connection and housekeeping helpers.
//!
//! A key/value meta table records collections and, per document, the active
//! generation pointer. Upserts go through `merge_insert` on `key`.
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};

use localrag_core::error::{Error, Result};

pub const META_TABLE: &str = "localrag_meta";

pub(crate) fn write_err(e: impl std::fmt::Display) -> Error { Error::StoreWriteFailure(format!("lancedb: {e}")) }
pub(crate) fn query_err(e: impl std::fmt::Display) -> Error { Error::StoreQueryFailure(format!("lancedb: {e}")) }

/// Quotes a string literal for a Lance SQL predicate.
pub fn sql_str(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(write_err)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(query_err)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
    conn.create_table(name, Box::new(iter)).execute().await.map_err(write_err)?;
    Ok(())
}

fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

pub async fn ensure_meta_table(conn: &Connection) -> Result<()> {
    ensure_table(conn, META_TABLE, build_meta_schema()).await
}

pub async fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let t = conn.open_table(META_TABLE).execute().await.map_err(write_err)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(write_err)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(write_err)?;
    Ok(())
}

/// All `(key, value)` pairs whose key starts with `prefix`.
pub async fn scan_meta(conn: &Connection, prefix: &str) -> Result<Vec<(String, String)>> {
    let t = conn.open_table(META_TABLE).execute().await.map_err(query_err)?;
    let pattern = sql_str(&format!("{prefix}%"));
    let mut stream = t.query().only_if(format!("key LIKE {pattern}")).execute().await.map_err(query_err)?;
    let mut out = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(query_err)? {
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| query_err(format!("meta.{name} column missing")))
        };
        let (keys, values) = (column("key")?, column("value")?);
        for i in 0..batch.num_rows() {
            // `_` in the prefix is a LIKE wildcard
            if keys.value(i).starts_with(prefix) {
                out.push((keys.value(i).to_string(), values.value(i).to_string()));
            }
        }
    }
    Ok(out)
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let t = conn.open_table(META_TABLE).execute().await.map_err(query_err)?;
    let mut stream = t.query().only_if(format!("key = {}", sql_str(key))).execute().await.map_err(query_err)?;
    while let Some(batch) = stream.try_next().await.map_err(query_err)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| query_err("meta.value column missing"))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

pub async fn delete_meta(conn: &Connection, predicate: &str) -> Result<()> {
    let t = conn.open_table(META_TABLE).execute().await.map_err(write_err)?;
    t.delete(predicate).await.map_err(write_err)?;
    Ok(())
}
