//! Weighted min-max fusion of the vector and keyword rankings.
//!
//! Each list is normalized to [0, 1] on its own (a single element or a list
//! of equal scores normalizes to 1.0), then
//! `score = weight * vector + (1 - weight) * keyword`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use localrag_core::error::{Error, Result};
use localrag_core::types::{Chunk, ChunkKey, Ranked, ScoredChunk};

/// What a chunk scores for a signal whose list does not contain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsentSignal {
    /// Absent counts as 0.0 for that signal.
    #[default]
    Zero,
    /// Chunks missing from a non-empty list are dropped.
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOptions {
    pub weight: f32,
    pub limit: usize,
    pub absent: AbsentSignal,
}

impl FusionOptions {
    pub fn new(weight: f32, limit: usize) -> Self {
        Self { weight, limit, absent: AbsentSignal::Zero }
    }

    #[must_use]
    pub fn with_absent(mut self, absent: AbsentSignal) -> Self {
        self.absent = absent;
        self
    }
}

pub fn validate_weight(weight: f32) -> Result<()> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("weight must be in [0, 1], got {weight}")))
    }
}

/// Min-max normalization. Empty in, empty out.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    if max > min {
        scores.iter().map(|&s| (s - min) / (max - min)).collect()
    } else {
        vec![1.0; scores.len()]
    }
}

/// Fuses two rankings with the default absent-signal policy.
pub fn fuse(vector: &[Ranked], keyword: &[Ranked], weight: f32, limit: usize) -> Result<Vec<ScoredChunk>> {
    fuse_with(vector, keyword, &FusionOptions::new(weight, limit))
}

#[derive(Default)]
struct Entry {
    chunk: Option<Arc<Chunk>>,
    vector: Option<(f32, f32)>,
    keyword: Option<(f32, f32)>,
}

/// Keeps the best raw score per chunk and drops non-finite scores.
fn dedupe(list: &[Ranked]) -> Vec<&Ranked> {
    let mut best: BTreeMap<ChunkKey, &Ranked> = BTreeMap::new();
    for r in list.iter().filter(|r| r.score.is_finite()) {
        best.entry(r.chunk.key())
            .and_modify(|cur| {
                if r.score > cur.score {
                    *cur = r;
                }
            })
            .or_insert(r);
    }
    best.into_values().collect()
}

pub fn fuse_with(vector: &[Ranked], keyword: &[Ranked], opts: &FusionOptions) -> Result<Vec<ScoredChunk>> {
    validate_weight(opts.weight)?;
    let vector = dedupe(vector);
    let keyword = dedupe(keyword);

    let mut entries: BTreeMap<ChunkKey, Entry> = BTreeMap::new();
    let vector_norm = min_max_normalize(&vector.iter().map(|r| r.score).collect::<Vec<_>>());
    for (r, norm) in vector.iter().zip(vector_norm) {
        let entry = entries.entry(r.chunk.key()).or_default();
        entry.chunk.get_or_insert_with(|| Arc::clone(&r.chunk));
        entry.vector = Some((r.score, norm));
    }
    let keyword_norm = min_max_normalize(&keyword.iter().map(|r| r.score).collect::<Vec<_>>());
    for (r, norm) in keyword.iter().zip(keyword_norm) {
        let entry = entries.entry(r.chunk.key()).or_default();
        entry.chunk.get_or_insert_with(|| Arc::clone(&r.chunk));
        entry.keyword = Some((r.score, norm));
    }

    let exclude = opts.absent == AbsentSignal::Exclude;
    let (has_vector, has_keyword) = (!vector.is_empty(), !keyword.is_empty());
    let w = opts.weight;
    let mut fused: Vec<ScoredChunk> = entries
        .into_values()
        .filter(|e| !exclude || ((!has_vector || e.vector.is_some()) && (!has_keyword || e.keyword.is_some())))
        .filter_map(|e| {
            let chunk = e.chunk?;
            let nv = e.vector.map_or(0.0, |(_, n)| n);
            let nk = e.keyword.map_or(0.0, |(_, n)| n);
            Some(ScoredChunk {
                chunk,
                vector_score: e.vector.map(|(raw, _)| raw),
                keyword_score: e.keyword.map(|(raw, _)| raw),
                normalized_vector: nv,
                normalized_keyword: nk,
                score: (w * nv + (1.0 - w) * nk).clamp(0.0, 1.0),
            })
        })
        .collect();
    fused.sort_by(fused_order(w));
    fused.truncate(opts.limit);
    Ok(fused)
}

/// Present scores sort before absent ones, higher first.
fn by_raw(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Fused score descending, then raw vector score descending (absent last),
/// then chunk index and document id ascending.
///
/// At weight 0 the vector signal carries no say: raw keyword score (absent
/// last) decides ties first, so the order matches the keyword ranking.
pub fn fused_order(weight: f32) -> impl Fn(&ScoredChunk, &ScoredChunk) -> Ordering {
    let keyword_only = weight <= 0.0;
    move |a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                if keyword_only {
                    by_raw(a.keyword_score, b.keyword_score)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| by_raw(a.vector_score, b.vector_score))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            .then_with(|| a.chunk.doc_id.cmp(&b.chunk.doc_id))
    }
}
