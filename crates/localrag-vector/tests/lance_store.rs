#![cfg(feature = "lance")]

use localrag_core::error::ErrorKind;
use localrag_core::traits::{ChunkWriter, KeywordSearch, StoreAdmin, VectorSearch};
use localrag_core::types::{Chunk, Metadata, MetadataFilter};
use localrag_vector::LanceChunkStore;

fn doc_chunks(doc: &str, texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk {
            doc_id: doc.to_string(),
            chunk_index: i,
            text: t.to_string(),
            embedding: vec![1.0, i as f32, 0.5],
            start_char: 0,
            end_char: t.len(),
            metadata: Metadata::from([("filename".to_string(), format!("{doc}.txt").into())]),
        })
        .collect()
}

#[tokio::test]
async fn lance_replace_and_reopen() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let none = MetadataFilter::new();
    {
        let store = LanceChunkStore::open(tmp.path()).await?;
        store.write("docs", "d1", doc_chunks("d1", &["apple one", "apple two", "apple three"])).await?;
        store.write("docs", "d1", doc_chunks("d1", &["banana only"])).await?;
        assert_eq!(store.get_document("docs", "d1").await?.len(), 1);
        assert!(store.keyword_search("docs", "apple", 10, &none).await?.is_empty());
        let hits = store.vector_search("docs", &[1.0, 0.0, 0.5], 10, &none).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "banana only");
    }
    let store = LanceChunkStore::open(tmp.path()).await?;
    assert_eq!(store.list_collections().await?, vec!["docs"]);
    let chunks = store.get_document("docs", "d1").await?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].metadata.get("filename").and_then(|v| v.as_str()), Some("d1.txt"));
    let kw = store.keyword_search("docs", "banana", 10, &none).await?;
    assert_eq!(kw.len(), 1);
    Ok(())
}

#[tokio::test]
async fn lance_admin_and_delete() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceChunkStore::open(tmp.path()).await?;
    store.write("docs", "d1", doc_chunks("d1", &["some words"])).await?;
    assert!(store.delete_document("docs", "d1").await?);
    assert!(!store.delete_document("docs", "d1").await?);
    assert_eq!(store.get_document("docs", "d1").await.unwrap_err().kind(), ErrorKind::NotFound);

    store.delete_collection("docs").await?;
    assert!(store.list_collections().await?.is_empty());
    assert_eq!(store.collection_stats("docs").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.create_collection("bad name!").await.unwrap_err().kind(), ErrorKind::InvalidConfig);
    Ok(())
}
