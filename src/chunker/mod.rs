//! Chunking strategies.
//!
//! A [`Chunker`] consumes documents and appends [`Chunk`]s in place.
//! Chunkers skip documents that already have chunks, so re-running a
//! chunker is a no-op. Every chunker annotates the document's
//! `meta.Chunker` with its fully-resolved config.
//!
//! Offset semantics: token and sentence chunkers record `start_i` /
//! `end_i` in units of their segmenter; strategies that rewrite or
//! strip text (recursive, code, markup, JSON) leave offsets unset
//! because downstream previews slice the original document with them.

pub mod json;
pub mod markup;
pub mod recursive;
pub mod semantic;
pub mod sentence;
pub mod token;

use async_trait::async_trait;
use std::sync::OnceLock;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::{Chunk, Document};
use crate::registry::Component;
use crate::schema::ComponentEntry;

/// A pluggable chunking strategy. The strategy is selected once per
/// ingest and applied to every document.
#[async_trait]
pub trait Chunker: Component {
    /// Append chunks to each document that has none. The embedder is
    /// supplied for strategies that vectorize during splitting.
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()>;
}

/// Clamp overlap below the window size, warning when the requested
/// value is unusable.
pub(crate) fn clamp_overlap(units: usize, overlap: usize, chunker: &str) -> usize {
    if units > 0 && overlap >= units {
        tracing::warn!(
            chunker,
            overlap,
            units,
            "overlap >= window size, clamping to window - 1"
        );
        units - 1
    } else {
        overlap
    }
}

/// Slide a window of `size` units over `units`, advancing
/// `size - overlap` per step. Returns windowed chunks with dense ids
/// and segmenter-unit spans. A window size of 0 or >= the unit count
/// yields one chunk covering everything.
pub(crate) fn window_chunks(units: &[&str], size: usize, overlap: usize) -> Vec<Chunk> {
    let n = units.len();
    if size == 0 || size >= n {
        let content = units.join(" ");
        return vec![Chunk::new(0, content.clone(), content).with_span(0, n)];
    }

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(n);
        let content = units[start..end].join(" ");
        let skip = if chunks.is_empty() { 0 } else { overlap };
        let without_overlap = units[start + skip..end].join(" ");
        let id = chunks.len();
        chunks.push(Chunk::new(id, content, without_overlap).with_span(start, end));
        if end == n {
            break;
        }
        start += step;
    }
    chunks
}

/// Split text at sentence boundaries. Terminators are `.`, `!`, `?`
/// (optionally followed by closing quotes or brackets); a trailing
/// fragment without a terminator becomes its own sentence.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<regex::Regex> = OnceLock::new();
    let re = BOUNDARY.get_or_init(|| {
        regex::Regex::new(r#"[^.!?]*[.!?]+["')\]]*\s*"#).expect("sentence boundary regex")
    });

    let mut sentences = Vec::new();
    let mut consumed = 0usize;
    for m in re.find_iter(text) {
        let s = m.as_str().trim();
        if !s.is_empty() {
            sentences.push(s.to_string());
        }
        consumed = m.end();
    }
    let tail = text[consumed..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Inclusive percentile of `values` (0–100), by nearest-rank.
pub(crate) fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counts_match_formula() {
        // ceil((N - o) / (u - o)) chunks for 0 < o < u <= N
        let words: Vec<String> = (0..600).map(|i| format!("w{i}")).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let chunks = window_chunks(&refs, 50, 10);
        let expected = (600f64 - 10.0) / (50.0 - 10.0);
        assert_eq!(chunks.len(), expected.ceil() as usize);
    }

    #[test]
    fn window_spans_step_by_size_minus_overlap() {
        let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let chunks = window_chunks(&refs, 20, 5);
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.end_i != Some(100) {
                assert_eq!(b.start_i.unwrap(), a.start_i.unwrap() + 15);
            }
        }
    }

    #[test]
    fn without_overlap_reconstructs_original() {
        let words: Vec<String> = (0..57).map(|i| format!("w{i}")).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let chunks = window_chunks(&refs, 10, 3);
        let joined = chunks
            .iter()
            .map(|c| c.content_without_overlap.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, words.join(" "));
    }

    #[test]
    fn oversized_window_is_single_chunk() {
        let refs = ["only", "four", "words", "here"];
        for size in [0, 4, 100] {
            let chunks = window_chunks(&refs, size, 1);
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].start_i, Some(0));
            assert_eq!(chunks[0].end_i, Some(4));
        }
    }

    #[test]
    fn sentences_split_on_terminators() {
        let text = "First sentence. Second one! Is this third? Trailing fragment";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "First sentence.");
        assert_eq!(sentences[3], "Trailing fragment");
    }

    #[test]
    fn percentile_nearest_rank() {
        let values = [0.1, 0.2, 0.3, 0.4, 0.5];
        assert!((percentile(&values, 0.0) - 0.1).abs() < 1e-6);
        assert!((percentile(&values, 100.0) - 0.5).abs() < 1e-6);
        assert!((percentile(&values, 50.0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn clamp_warns_and_reduces() {
        assert_eq!(clamp_overlap(10, 15, "Token"), 9);
        assert_eq!(clamp_overlap(10, 3, "Token"), 3);
    }
}
