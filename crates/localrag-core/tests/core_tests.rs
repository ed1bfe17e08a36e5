use figment::providers::{Format, Serialized, Toml};
use figment::Figment;

use localrag_core::chunker::{estimate_page, Chunker};
use localrag_core::config::{Config, EmbeddingProvider, Settings};
use localrag_core::types::{Chunk, Document, MetaValue, Metadata, MetadataFilter, SearchMode};
use localrag_core::{chunk, CancelToken, Error, ErrorKind, IngestStage};

#[test]
fn chunker_rejects_bad_sizes() {
    assert!(matches!(Chunker::new(0, 0), Err(Error::InvalidConfig(_))));
    assert!(matches!(Chunker::new(10, 10), Err(Error::InvalidConfig(_))));
    assert!(matches!(Chunker::new(10, 12), Err(Error::InvalidConfig(_))));
    assert!(Chunker::new(10, 9).is_ok());
}

#[test]
fn fifteen_chars_size_ten_overlap_two() {
    let chunker = Chunker::new(10, 2).expect("chunker");
    let chunks = chunker.split("abcdefghijklmno");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "abcdefghij");
    assert_eq!(chunks[1].text, "ijklmno");
    assert_eq!(chunks[1].start_char, 8, "second chunk starts at offset 8");
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
}

#[test]
fn snaps_to_sentence_end() {
    let text = "One two. Three four five six seven";
    let chunker = Chunker::new(20, 0).expect("chunker");
    let chunks = chunker.split(text);
    assert_eq!(chunks[0].text, "One two.");
    assert_eq!(chunks[0].end_char, 8);
}

#[test]
fn falls_back_to_whitespace() {
    let text = "alpha bravo charlie delta";
    let chunker = Chunker::new(14, 0).expect("chunker");
    let texts: Vec<String> = chunker.split(text).into_iter().map(|c| c.text).collect();
    assert_eq!(texts, vec!["alpha bravo", "charlie delta"]);
}

#[test]
fn boundary_window_zero_cuts_hard() {
    let chunker = Chunker::new(8, 0).expect("chunker").with_boundary_window(0);
    let texts: Vec<String> = chunker.split("abc. defghijk").into_iter().map(|c| c.text).collect();
    assert_eq!(texts, vec!["abc. def", "ghijk"]);
}

#[test]
fn multibyte_text_is_counted_in_chars() {
    let text = "ééééééééééüüüüü";
    let chunks = chunk(text, 10, 2).expect("chunk");
    assert_eq!(chunks[0].chars().count(), 10);
    assert_eq!(chunks[1], "ééüüüüü");
}

#[test]
fn empty_and_blank_text_produce_no_chunks() {
    let chunker = Chunker::new(10, 2).expect("chunker");
    assert!(chunker.split("").is_empty());
    assert!(chunker.split("   \n\t  ").is_empty());
}

#[test]
fn windows_tile_the_text() {
    let text = "The quick brown fox jumps over the lazy dog. It barked! Did it? Yes.";
    let chunker = Chunker::new(16, 4).expect("chunker").with_boundary_window(6);
    let spans = chunker.windows(text);
    assert_eq!(spans.first().map(|s| s.0), Some(0));
    assert_eq!(spans.last().map(|s| s.1), Some(text.chars().count()));
    for pair in spans.windows(2) {
        assert_eq!(pair[1].0, pair[0].1 - 4, "next window starts overlap chars back");
    }
    let chars: Vec<char> = text.chars().collect();
    let mut rebuilt: String = chars[spans[0].0..spans[0].1].iter().collect();
    for &(s, e) in &spans[1..] {
        rebuilt.extend(&chars[s + 4..e]);
    }
    assert_eq!(rebuilt, text);
}

#[test]
fn page_estimate_is_bounded() {
    assert_eq!(estimate_page(0, 0), 1);
    assert_eq!(estimate_page(0, 500), 1);
    assert_eq!(estimate_page(3999, 4000), 2);
    assert_eq!(estimate_page(10_000, 10_000), 5);
}

#[test]
fn document_ids_are_content_derived() {
    let a = Document::new("a.txt", "hello");
    let b = Document::new("a.txt", "hello");
    let c = Document::new("b.txt", "hello");
    assert_eq!(a.id, b.id);
    assert_ne!(a.id, c.id);
    assert_eq!(a.id.len(), 32);
    assert_eq!(Document::with_id("x", "Report.PDF", "").file_type(), "pdf");
    assert_eq!(Document::with_id("x", "notes", "").file_type(), "txt");
}

fn chunk_with(meta: &[(&str, MetaValue)]) -> Chunk {
    let metadata: Metadata = meta.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
    Chunk { doc_id: "doc-1".into(), chunk_index: 0, text: "t".into(), embedding: vec![], start_char: 0, end_char: 1, metadata }
}

#[test]
fn metadata_filter_exact_match() {
    let c = chunk_with(&[("filename", "a.txt".into()), ("page_number", MetaValue::Int(2))]);
    assert!(MetadataFilter::new().matches(&c));
    assert!(MetadataFilter::new().with("filename", "a.txt").matches(&c));
    assert!(MetadataFilter::new().with("page_number", 2.0).matches(&c), "ints and floats compare numerically");
    assert!(!MetadataFilter::new().with("filename", "b.txt").matches(&c));
    assert!(!MetadataFilter::new().with("missing", true).matches(&c));
    assert!(MetadataFilter::new().with("doc_id", "doc-1").matches(&c));
    assert!(!MetadataFilter::new().with("doc_id", "doc-2").matches(&c));
}

#[test]
fn metadata_filter_from_json() {
    let json = serde_json::json!({"filename": "a.txt", "page_number": 2, "draft": false});
    let filter = MetadataFilter::from_json(&json).expect("filter");
    let c = chunk_with(&[("filename", "a.txt".into()), ("page_number", MetaValue::Int(2)), ("draft", false.into())]);
    assert!(filter.matches(&c));
    assert!(MetadataFilter::from_json(&serde_json::json!(["x"])).is_err());
    assert!(MetadataFilter::from_json(&serde_json::json!({"k": {"nested": 1}})).is_err());
}

#[test]
fn search_mode_parses() {
    assert_eq!("Vector".parse::<SearchMode>().expect("mode"), SearchMode::Vector);
    assert_eq!("text".parse::<SearchMode>().expect("mode"), SearchMode::Keyword);
    assert!("fuzzy".parse::<SearchMode>().is_err());
}

#[test]
fn error_kind_sees_through_wrappers() {
    let err = Error::ingest("doc", IngestStage::Embedded, Error::EmbeddingFailure("boom".into()));
    assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
    assert!(err.to_string().contains("doc"));
    assert!(err.to_string().contains("embedded"));
}

#[test]
fn settings_defaults_and_overrides() {
    let config = Config::from_figment(
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string("[chunking]\nchunk_size = 500\nchunk_overlap = 50\n[embedding]\ndim = 384")),
    )
    .expect("config");
    let settings = config.settings().expect("settings");
    assert_eq!(settings.chunking.chunk_size, 500);
    assert_eq!(settings.chunking.chunk_overlap, 50);
    assert_eq!(settings.embedding.dim, 384);
    assert_eq!(settings.embedding.provider, EmbeddingProvider::Hash);
    assert_eq!(settings.search.default_limit, 10);
    let size: usize = config.get("chunking.chunk_size").expect("key");
    assert_eq!(size, 500);
}

#[test]
fn settings_reject_overlap_not_smaller_than_size() {
    let res = Config::from_figment(
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string("[chunking]\nchunk_size = 100\nchunk_overlap = 100")),
    );
    assert!(matches!(res.err().map(|e| e.kind()), Some(ErrorKind::InvalidConfig)));
}

#[test]
fn settings_reject_weight_out_of_range() {
    let mut settings = Settings::default();
    settings.search.hybrid_weight = 1.5;
    assert!(settings.validate().is_err());
}

#[tokio::test]
async fn cancel_token_interrupts_pending_work() {
    let token = CancelToken::new();
    let t2 = token.clone();
    let handle = tokio::spawn(async move {
        t2.run(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok::<_, Error>(())
        })
        .await
    });
    tokio::task::yield_now().await;
    token.cancel();
    let res = handle.await.expect("join");
    assert!(matches!(res, Err(Error::Cancelled)));
    assert!(token.check().is_err());
}
