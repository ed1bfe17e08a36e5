//! Human-readable rendering of chunks, search results and stats.

use localrag_core::types::CollectionStats;
use localrag_core::TextChunk;
use localrag_hybrid::{SearchHit, SearchResponse};

const PREVIEW_CHARS: usize = 200;

/// First `max` chars of `text` on one line, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

pub fn print_chunks(chunks: &[TextChunk]) {
    for c in chunks {
        println!("[{}] chars {}..{} ({} chars)", c.index, c.start_char, c.end_char, c.text.chars().count());
        println!("    {}", preview(&c.text, PREVIEW_CHARS));
    }
    println!("\n📄 {} chunks", chunks.len());
}

fn score(v: Option<f32>) -> String {
    v.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"))
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let page = hit.citation.page_number.map(|p| format!(", page {p}")).unwrap_or_default();
    println!(
        "{rank:>2}. [{:.4}] {} #{}{page}  (vector {}, keyword {})",
        hit.score,
        hit.citation.filename,
        hit.chunk_index,
        score(hit.vector_score),
        score(hit.keyword_score)
    );
    println!("    {}", preview(&hit.text, PREVIEW_CHARS));
}

pub fn print_response(response: &SearchResponse) {
    println!(
        "🔍 \"{}\" in '{}' ({} mode, {} results, {} ms)",
        response.query, response.collection, response.mode, response.total, response.elapsed_ms
    );
    if response.results.is_empty() {
        println!("No matches.");
        return;
    }
    for (i, hit) in response.results.iter().enumerate() {
        print_hit(i + 1, hit);
    }
}

pub fn print_stats(stats: &CollectionStats) {
    println!("📊 Collection '{}'", stats.name);
    println!("  documents: {}", stats.documents);
    println!("  chunks:    {}", stats.chunks);
    println!("  dimension: {}", stats.dimension.map_or_else(|| "-".to_string(), |d| d.to_string()));
    println!("  created:   {}", stats.created_at.to_rfc3339());
    println!("  updated:   {}", stats.updated_at.to_rfc3339());
}
