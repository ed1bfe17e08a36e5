use std::sync::Arc;

use localrag_core::error::ErrorKind;
use localrag_core::types::{Chunk, Metadata, Ranked};
use localrag_hybrid::fusion::min_max_normalize;
use localrag_hybrid::{fuse, fuse_with, AbsentSignal, FusionOptions};
use proptest::prelude::*;

fn ranked(doc: &str, idx: usize, score: f32) -> Ranked {
    Ranked {
        chunk: Arc::new(Chunk {
            doc_id: doc.to_string(),
            chunk_index: idx,
            text: format!("{doc} {idx}"),
            embedding: Vec::new(),
            start_char: 0,
            end_char: 0,
            metadata: Metadata::new(),
        }),
        score,
    }
}

fn docs(out: &[localrag_core::types::ScoredChunk]) -> Vec<String> {
    out.iter().map(|s| s.chunk.doc_id.clone()).collect()
}

#[test]
fn equal_fused_scores_break_on_raw_vector_score() {
    let vector = vec![ranked("A", 0, 0.9), ranked("B", 0, 0.5)];
    let keyword = vec![ranked("B", 0, 3.0), ranked("C", 0, 1.0)];
    let out = fuse(&vector, &keyword, 0.5, 10).unwrap();
    assert_eq!(docs(&out), vec!["A", "B", "C"]);
    assert!((out[0].score - 0.5).abs() < 1e-6);
    assert!((out[1].score - 0.5).abs() < 1e-6);
    assert_eq!(out[2].score, 0.0);
    assert_eq!(out[2].vector_score, None);
    assert_eq!(out[1].keyword_score, Some(3.0));
}

#[test]
fn weight_zero_keeps_keyword_hits_ahead_of_vector_only_chunks() {
    let vector = vec![ranked("V", 0, 0.9)];
    let keyword = vec![ranked("K1", 0, 3.0), ranked("K2", 0, 1.0)];
    let out = fuse(&vector, &keyword, 0.0, 2).unwrap();
    assert_eq!(docs(&out), vec!["K1", "K2"]);

    let out = fuse(&vector, &keyword, 0.0, 3).unwrap();
    assert_eq!(docs(&out), vec!["K1", "K2", "V"]);
}

#[test]
fn weight_one_keeps_vector_hits_ahead_of_keyword_only_chunks() {
    let vector = vec![ranked("V1", 0, 0.9), ranked("V2", 0, 0.1)];
    let keyword = vec![ranked("K", 0, 7.0)];
    let out = fuse(&vector, &keyword, 1.0, 2).unwrap();
    assert_eq!(docs(&out), vec!["V1", "V2"]);
}

#[test]
fn normalization_edge_cases() {
    assert!(min_max_normalize(&[]).is_empty());
    assert_eq!(min_max_normalize(&[0.42]), vec![1.0]);
    assert_eq!(min_max_normalize(&[2.0, 2.0, 2.0]), vec![1.0, 1.0, 1.0]);
    assert_eq!(min_max_normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
}

#[test]
fn single_signal_results_score_by_that_signal_alone() {
    let vector = vec![ranked("A", 0, 0.8)];
    let out = fuse(&vector, &[], 0.7, 10).unwrap();
    assert_eq!(out.len(), 1);
    assert!((out[0].score - 0.7).abs() < 1e-6);

    let keyword = vec![ranked("K", 0, 5.0), ranked("K", 1, 1.0)];
    let out = fuse(&[], &keyword, 0.0, 10).unwrap();
    assert_eq!(out[0].chunk.chunk_index, 0);
    assert_eq!(out[0].score, 1.0);
    assert_eq!(out[1].score, 0.0);
}

#[test]
fn invalid_weights_are_rejected() {
    for w in [-0.1, 1.5, f32::NAN] {
        let err = fuse(&[], &[], w, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
    assert!(fuse(&[], &[], 0.5, 10).unwrap().is_empty());
}

#[test]
fn ties_without_vector_scores_fall_back_to_index_then_doc() {
    let keyword = vec![ranked("b", 1, 2.0), ranked("a", 1, 2.0), ranked("c", 0, 2.0)];
    let out = fuse(&[], &keyword, 0.0, 10).unwrap();
    let keys: Vec<String> = out.iter().map(|s| s.chunk.key().to_string()).collect();
    assert_eq!(keys, vec!["c:0", "a:1", "b:1"]);
}

#[test]
fn exclude_policy_drops_one_sided_chunks() {
    let vector = vec![ranked("A", 0, 0.9), ranked("B", 0, 0.5)];
    let keyword = vec![ranked("B", 0, 3.0), ranked("C", 0, 1.0)];
    let opts = FusionOptions::new(0.5, 10).with_absent(AbsentSignal::Exclude);
    let out = fuse_with(&vector, &keyword, &opts).unwrap();
    assert_eq!(docs(&out), vec!["B"]);

    // an empty list never excludes anything
    let out = fuse_with(&vector, &[], &opts).unwrap();
    assert_eq!(docs(&out), vec!["A", "B"]);
}

#[test]
fn duplicates_keep_best_score_and_limit_truncates() {
    let vector = vec![ranked("A", 0, 0.2), ranked("A", 0, 0.9), ranked("B", 0, 0.1), ranked("C", 0, f32::NAN)];
    let out = fuse(&vector, &[], 1.0, 1).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].vector_score, Some(0.9));
}

fn ranked_list(prefix: &'static str) -> impl Strategy<Value = Vec<Ranked>> {
    prop::collection::vec((0usize..6, 0.0f32..50.0), 0..12)
        .prop_map(move |items| items.into_iter().map(|(i, s)| ranked(prefix, i, s)).collect())
}

proptest! {
    #[test]
    fn fused_scores_stay_in_unit_interval(
        vector in ranked_list("v"),
        keyword in ranked_list("k"),
        weight in 0.0f32..=1.0,
        limit in 0usize..20,
    ) {
        let out = fuse(&vector, &keyword, weight, limit).unwrap();
        prop_assert!(out.len() <= limit);
        for s in &out {
            prop_assert!((0.0..=1.0).contains(&s.score));
        }
        for pair in out.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn weight_one_orders_by_vector_and_zero_by_keyword(
        vector in ranked_list("d"),
        keyword in ranked_list("d"),
    ) {
        let by_vector = fuse(&vector, &keyword, 1.0, 100).unwrap();
        for pair in by_vector.windows(2) {
            prop_assert!(pair[0].normalized_vector >= pair[1].normalized_vector);
        }
        let by_keyword = fuse(&vector, &keyword, 0.0, 100).unwrap();
        for pair in by_keyword.windows(2) {
            prop_assert!(pair[0].normalized_keyword >= pair[1].normalized_keyword);
        }
    }

    #[test]
    fn weight_zero_truncation_keeps_the_keyword_ranking(
        vector in ranked_list("d"),
        keyword in ranked_list("d"),
        limit in 0usize..10,
    ) {
        let keyword_only = fuse(&[], &keyword, 0.0, limit).unwrap();
        let blended = fuse(&vector, &keyword, 0.0, limit).unwrap();
        let raw = |out: &[localrag_core::types::ScoredChunk]| {
            out.iter().filter_map(|s| s.keyword_score).collect::<Vec<_>>()
        };
        // same keyword hits survive, in the same score order, and come first
        let expected = raw(&keyword_only);
        let got = raw(&blended);
        prop_assert_eq!(&got, &expected);
        prop_assert!(blended[..got.len()].iter().all(|s| s.keyword_score.is_some()));
    }

    #[test]
    fn fusion_is_deterministic(vector in ranked_list("x"), keyword in ranked_list("y"), weight in 0.0f32..=1.0) {
        let a = fuse(&vector, &keyword, weight, 50).unwrap();
        let mut v2 = vector.clone();
        v2.reverse();
        let mut k2 = keyword.clone();
        k2.reverse();
        let b = fuse(&v2, &k2, weight, 50).unwrap();
        let keys = |out: &[localrag_core::types::ScoredChunk]| out.iter().map(|s| s.chunk.key()).collect::<Vec<_>>();
        prop_assert_eq!(keys(&a), keys(&b));
    }
}
