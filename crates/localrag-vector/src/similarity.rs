use std::cmp::Ordering;

use localrag_core::types::Ranked;

/// `dot(a, b) / (|a| * |b|)`, or `None` when either norm is zero, the lengths
/// differ, or the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    sim.is_finite().then(|| sim.clamp(-1.0, 1.0) as f32)
}

/// Score descending, then document id and chunk index ascending.
pub fn rank_order(a: &Ranked, b: &Ranked) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.doc_id.cmp(&b.chunk.doc_id))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}
