use std::sync::Arc;

use localrag_core::error::ErrorKind;
use localrag_core::traits::{ChunkWriter, KeywordSearch, StoreAdmin, VectorSearch};
use localrag_core::types::{Chunk, Metadata, MetadataFilter};
use localrag_vector::{cosine_similarity, MemoryChunkStore};

fn chunk(doc: &str, idx: usize, text: &str, embedding: Vec<f32>) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert("filename".to_string(), format!("{doc}.txt").into());
    Chunk {
        doc_id: doc.to_string(),
        chunk_index: idx,
        text: text.to_string(),
        embedding,
        start_char: idx * 10,
        end_char: idx * 10 + text.chars().count(),
        metadata,
    }
}

fn doc_chunks(doc: &str, texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| chunk(doc, i, t, vec![1.0, i as f32 + 1.0, 0.0]))
        .collect()
}

#[test]
fn cosine_handles_degenerate_vectors() {
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
    assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).is_some_and(|s| (s + 1.0).abs() < 1e-6));
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    assert_eq!(cosine_similarity(&[], &[]), None);
}

#[tokio::test]
async fn write_then_read_back_document() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.write("docs", "d1", doc_chunks("d1", &["alpha beta", "gamma delta"])).await?;

    let chunks = store.get_document("docs", "d1").await?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "alpha beta");
    assert_eq!(chunks[1].chunk_index, 1);

    let stats = store.collection_stats("docs").await?;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.dimension, Some(3));
    Ok(())
}

#[tokio::test]
async fn smaller_reingest_leaves_no_orphans() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.write("docs", "d1", doc_chunks("d1", &["apple one", "apple two", "apple three"])).await?;
    store.write("docs", "d1", doc_chunks("d1", &["banana only"])).await?;

    assert_eq!(store.get_document("docs", "d1").await?.len(), 1);
    let none = MetadataFilter::new();
    assert!(store.keyword_search("docs", "apple", 10, &none).await?.is_empty());
    let hits = store.keyword_search("docs", "banana", 10, &none).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.text, "banana only");

    let vec_hits = store.vector_search("docs", &[1.0, 1.0, 0.0], 10, &none).await?;
    assert_eq!(vec_hits.len(), 1);
    assert_eq!(store.collection_stats("docs").await?.chunks, 1);
    Ok(())
}

const COLORS: [&str; 6] = ["red", "blue", "green", "amber", "violet", "slate"];

/// Chunk set of one color: `color.len()` chunks, so size and text agree.
fn colored(doc: &str, color: &str) -> Vec<Chunk> {
    let texts: Vec<String> = (0..color.len()).map(|i| format!("{color} part{i}")).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    doc_chunks(doc, &refs)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_one_document_leave_one_whole_set() -> anyhow::Result<()> {
    let store = Arc::new(MemoryChunkStore::new());
    let mut writers = Vec::new();
    for (w, color) in COLORS.iter().enumerate() {
        let store = Arc::clone(&store);
        writers.push(tokio::spawn(async move {
            for round in 0..10 {
                let color = COLORS[(w + round) % COLORS.len()];
                store.write("docs", "d1", colored("d1", color)).await?;
            }
            store.write("docs", "d1", colored("d1", color)).await
        }));
    }
    for writer in writers {
        writer.await??;
    }

    let texts: Vec<String> = store.get_document("docs", "d1").await?.iter().map(|c| c.text.clone()).collect();
    let color = texts.first().and_then(|t| t.split(' ').next()).unwrap_or_default().to_string();
    assert!(COLORS.contains(&color.as_str()), "unexpected set: {texts:?}");
    assert_eq!(texts.len(), color.len(), "partial set: {texts:?}");
    assert!(texts.iter().all(|t| t.starts_with(&color)), "mixed set: {texts:?}");

    let none = MetadataFilter::new();
    for other in COLORS.iter().filter(|c| **c != color) {
        assert!(store.keyword_search("docs", other, 10, &none).await?.is_empty(), "stale {other} rows visible");
    }
    assert_eq!(store.keyword_search("docs", &color, 10, &none).await?.len(), color.len());
    assert_eq!(store.collection_stats("docs").await?.chunks, color.len());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_partial_sets_during_rewrites() -> anyhow::Result<()> {
    let store = Arc::new(MemoryChunkStore::new());
    store.write("docs", "d1", doc_chunks("d1", &["even zero", "even one"])).await?;

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for round in 0..200 {
                let set = if round % 2 == 0 {
                    doc_chunks("d1", &["odd zero", "odd one", "odd two"])
                } else {
                    doc_chunks("d1", &["even zero", "even one"])
                };
                store.write("docs", "d1", set).await?;
            }
            anyhow::Ok(())
        })
    };
    let mut readers = Vec::new();
    for _ in 0..3 {
        let store = Arc::clone(&store);
        readers.push(tokio::spawn(async move {
            let none = MetadataFilter::new();
            for _ in 0..300 {
                let chunks = store.get_document("docs", "d1").await?;
                let odd = chunks.iter().filter(|c| c.text.starts_with("odd")).count();
                assert!(odd == 0 && chunks.len() == 2 || odd == 3 && chunks.len() == 3);

                // every generation has a "zero" chunk, so a consistent view always finds one
                let hits = store.keyword_search("docs", "zero", 10, &none).await?;
                assert_eq!(hits.len(), 1, "keyword view lost the document");
                let hits = store.keyword_search("docs", "zero one two", 10, &none).await?;
                assert!(hits.len() == 2 || hits.len() == 3, "partial keyword set: {}", hits.len());
                let kinds: Vec<bool> = hits.iter().map(|h| h.chunk.text.starts_with("odd")).collect();
                assert!(kinds.windows(2).all(|w| w[0] == w[1]), "mixed generations in keyword hits");
                tokio::task::yield_now().await;
            }
            anyhow::Ok(())
        }));
    }
    for reader in readers {
        reader.await??;
    }
    writer.await??;
    Ok(())
}

#[tokio::test]
async fn rejects_malformed_chunk_sets() {
    let store = MemoryChunkStore::new();
    let gap = vec![chunk("d1", 0, "a", vec![1.0]), chunk("d1", 2, "b", vec![1.0])];
    let err = store.write("docs", "d1", gap).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreWriteFailure);

    let foreign = vec![chunk("other", 0, "a", vec![1.0])];
    assert_eq!(store.write("docs", "d1", foreign).await.unwrap_err().kind(), ErrorKind::StoreWriteFailure);

    let ragged = vec![chunk("d1", 0, "a", vec![1.0, 0.0]), chunk("d1", 1, "b", vec![1.0])];
    assert_eq!(store.write("docs", "d1", ragged).await.unwrap_err().kind(), ErrorKind::StoreWriteFailure);

    store.write("docs", "d1", vec![chunk("d1", 0, "a", vec![1.0, 0.0])]).await.unwrap();
    let wrong_dim = vec![chunk("d2", 0, "b", vec![1.0, 0.0, 0.0])];
    assert_eq!(store.write("docs", "d2", wrong_dim).await.unwrap_err().kind(), ErrorKind::StoreWriteFailure);
    // the failed write changed nothing
    assert_eq!(store.get_document("docs", "d1").await.unwrap().len(), 1);
    assert_eq!(store.get_document("docs", "d2").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn vector_search_orders_by_cosine_and_skips_zero_vectors() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store
        .write(
            "docs",
            "d1",
            vec![
                chunk("d1", 0, "east", vec![1.0, 0.0]),
                chunk("d1", 1, "north", vec![0.0, 1.0]),
                chunk("d1", 2, "nothing", vec![0.0, 0.0]),
            ],
        )
        .await?;
    store.write("docs", "d0", vec![chunk("d0", 0, "also east", vec![2.0, 0.0])]).await?;

    let hits = store.vector_search("docs", &[1.0, 0.0], 10, &MetadataFilter::new()).await?;
    let keys: Vec<String> = hits.iter().map(|h| h.chunk.key().to_string()).collect();
    // equal scores fall back to (doc_id, chunk_index)
    assert_eq!(keys, vec!["d0:0", "d1:0", "d1:1"]);
    assert!(hits[0].score > hits[2].score);

    assert!(store.vector_search("docs", &[0.0, 0.0], 10, &MetadataFilter::new()).await?.is_empty());
    let err = store.vector_search("docs", &[1.0, 0.0, 0.0], 10, &MetadataFilter::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreQueryFailure);
    Ok(())
}

#[tokio::test]
async fn filters_apply_to_both_signals() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.write("docs", "d1", doc_chunks("d1", &["shared words here"])).await?;
    store.write("docs", "d2", doc_chunks("d2", &["shared words there"])).await?;

    let only_d2 = MetadataFilter::new().with("filename", "d2.txt");
    let kw = store.keyword_search("docs", "shared", 10, &only_d2).await?;
    assert_eq!(kw.len(), 1);
    assert_eq!(kw[0].chunk.doc_id, "d2");

    let by_id = MetadataFilter::new().with("doc_id", "d1");
    let vec_hits = store.vector_search("docs", &[1.0, 1.0, 0.0], 10, &by_id).await?;
    assert_eq!(vec_hits.len(), 1);
    assert_eq!(vec_hits[0].chunk.doc_id, "d1");

    let nobody = MetadataFilter::new().with("filename", "missing.txt");
    assert!(store.keyword_search("docs", "shared", 10, &nobody).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn keyword_search_ranks_and_tolerates_syntax() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.write("docs", "d1", doc_chunks("d1", &["fire fire fire safety", "water"])).await?;
    store.write("docs", "d2", doc_chunks("d2", &["one fire among many other words here"])).await?;

    let hits = store.keyword_search("docs", "fire", 10, &MetadataFilter::new()).await?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.key().to_string(), "d1:0");
    assert!(hits.iter().all(|h| h.score >= 0.0));

    store.keyword_search("docs", "fire AND (\"unbalanced", 10, &MetadataFilter::new()).await?;
    assert!(store.keyword_search("docs", "fire", 0, &MetadataFilter::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_write_clears_document() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.write("docs", "d1", doc_chunks("d1", &["temporary text"])).await?;
    store.write("docs", "d1", Vec::new()).await?;
    assert_eq!(store.get_document("docs", "d1").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(store.keyword_search("docs", "temporary", 10, &MetadataFilter::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_document_is_idempotent() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    assert!(!store.delete_document("nowhere", "d1").await?);
    store.write("docs", "d1", doc_chunks("d1", &["some text"])).await?;
    assert!(store.delete_document("docs", "d1").await?);
    assert!(!store.delete_document("docs", "d1").await?);
    assert!(store.keyword_search("docs", "text", 10, &MetadataFilter::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn admin_operations() -> anyhow::Result<()> {
    let store = MemoryChunkStore::new();
    store.create_collection("zeta").await?;
    store.create_collection("alpha").await?;
    store.create_collection("alpha").await?;
    assert_eq!(store.list_collections().await?, vec!["alpha", "zeta"]);

    let stats = store.collection_stats("alpha").await?;
    assert_eq!((stats.documents, stats.chunks, stats.dimension), (0, 0, None));
    assert_eq!(stats.updated_at, stats.created_at);
    assert!(store.vector_search("alpha", &[1.0], 5, &MetadataFilter::new()).await?.is_empty());

    store.write("alpha", "d1", doc_chunks("d1", &["one", "two"])).await?;
    let written = store.collection_stats("alpha").await?;
    assert_eq!((written.documents, written.chunks, written.dimension), (1, 2, Some(3)));
    assert_eq!(written.created_at, stats.created_at);
    assert!(written.updated_at >= stats.updated_at);

    store.delete_collection("zeta").await?;
    assert_eq!(store.list_collections().await?, vec!["alpha"]);

    let none = MetadataFilter::new();
    assert_eq!(store.delete_collection("zeta").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.collection_stats("zeta").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.vector_search("zeta", &[1.0], 5, &none).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.keyword_search("zeta", "x", 5, &none).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.get_document("zeta", "d").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.create_collection("  ").await.unwrap_err().kind(), ErrorKind::InvalidConfig);
    Ok(())
}
