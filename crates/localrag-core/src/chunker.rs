//! Sliding-window text chunker with sentence/word boundary snapping.
//!
//! Sizes are counted in chars. Each window is at most `chunk_size` long and the
//! next window starts `overlap` chars before the previous one ended, so the
//! windows tile the text exactly. Windows are shortened (never lengthened) to a
//! nearby sentence terminator or whitespace when one lies within
//! `boundary_window` chars of the hard cut.

use serde::Serialize;

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};

pub const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];
pub const DEFAULT_BOUNDARY_WINDOW: usize = 100;
/// Rough page length used to estimate citation page numbers.
pub const CHARS_PER_PAGE: usize = 2000;

/// One emitted chunk. `start_char..end_char` is the untrimmed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    boundary_window: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than zero".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, overlap, boundary_window: DEFAULT_BOUNDARY_WINDOW })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Ok(Self::new(settings.chunk_size, settings.chunk_overlap)?.with_boundary_window(settings.boundary_window))
    }

    /// Zero disables boundary snapping entirely.
    #[must_use]
    pub fn with_boundary_window(mut self, boundary_window: usize) -> Self {
        self.boundary_window = boundary_window;
        self
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }
    pub fn overlap(&self) -> usize { self.overlap }

    /// Char ranges of every window, in order. Consecutive ranges satisfy
    /// `next.0 == prev.1 - overlap`; the first starts at 0 and the last ends at
    /// the text length.
    pub fn windows(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        self.windows_of(&chars)
    }

    fn windows_of(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        if len == 0 {
            return spans;
        }
        let mut start = 0;
        loop {
            let hard_end = (start + self.chunk_size).min(len);
            let end = if hard_end < len { self.snap_end(chars, start, hard_end) } else { hard_end };
            spans.push((start, end));
            if end >= len {
                break;
            }
            // snap_end keeps end > start + overlap, so this always advances
            start = end - self.overlap;
        }
        spans
    }

    /// Picks the window end: after the last sentence terminator, else before
    /// the last whitespace, else the hard cut.
    fn snap_end(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        if self.boundary_window == 0 {
            return hard_end;
        }
        let floor = (start + self.overlap).max(hard_end.saturating_sub(self.boundary_window));
        if let Some(p) = (floor..hard_end).rev().find(|&p| SENTENCE_TERMINATORS.contains(&chars[p])) {
            return p + 1;
        }
        // a whitespace at hard_end itself means the hard cut splits nothing
        if let Some(p) = (floor + 1..=hard_end).rev().find(|&p| chars[p].is_whitespace()) {
            return p;
        }
        hard_end
    }

    /// Splits `text` into trimmed, non-empty chunks with contiguous indices.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        for (start, end) in self.windows_of(&chars) {
            let raw: String = chars[start..end].iter().collect();
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            chunks.push(TextChunk { index: chunks.len(), text: trimmed.to_string(), start_char: start, end_char: end });
        }
        chunks
    }
}

/// Convenience wrapper returning only chunk texts.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(Chunker::new(chunk_size, overlap)?.split(text).into_iter().map(|c| c.text).collect())
}

/// Estimated 1-based page of a char offset, assuming `CHARS_PER_PAGE`.
pub fn estimate_page(start_char: usize, total_chars: usize) -> usize {
    if total_chars == 0 {
        return 1;
    }
    let pages = (total_chars / CHARS_PER_PAGE).max(1);
    (start_char * pages / total_chars + 1).clamp(1, pages)
}
