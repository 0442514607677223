//! Recursive character splitter and its language-aware variant.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::{Chunk, Document};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::Chunker;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split by the first separator until every piece fits `chunk_size`
/// characters, recursing with the next separator for oversized pieces.
/// The empty separator means a hard character split.
fn split_recursive(text: &str, separators: &[String], chunk_size: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= chunk_size {
        return vec![trimmed.to_string()];
    }
    let Some((sep, rest)) = separators.split_first() else {
        return vec![trimmed.to_string()];
    };

    if sep.is_empty() {
        let chars: Vec<char> = trimmed.chars().collect();
        return chars
            .chunks(chunk_size.max(1))
            .map(|c| c.iter().collect::<String>())
            .collect();
    }

    let mut pieces = Vec::new();
    for part in trimmed.split(sep.as_str()) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.chars().count() <= chunk_size {
            pieces.push(part.to_string());
        } else {
            pieces.extend(split_recursive(part, rest, chunk_size));
        }
    }
    if pieces.is_empty() {
        vec![trimmed.to_string()]
    } else {
        pieces
    }
}

/// Turn split pieces into chunks, carrying `overlap` trailing
/// characters of the previous piece into each chunk's content.
/// Offsets stay unset: the splitter strips whitespace.
fn assemble(pieces: Vec<String>, overlap: usize, labels: &[String]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.into_iter().enumerate() {
        let content = if i == 0 || overlap == 0 {
            piece.clone()
        } else {
            let prev = &chunks[i - 1].content_without_overlap;
            let tail: String = prev
                .chars()
                .rev()
                .take(overlap)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("{} {}", tail.trim_start(), piece)
        };
        let mut chunk = Chunk::new(i, content, piece);
        chunk.labels = labels.to_vec();
        chunks.push(chunk);
    }
    chunks
}

async fn run_split(
    config: &ComponentEntry,
    docs: &mut [Document],
    separators: &[String],
) -> Result<()> {
    let chunk_size = config.int_field("Chunk Size")?.max(1) as usize;
    let overlap = config.int_field("Overlap")?.max(0) as usize;

    for doc in docs.iter_mut() {
        if !doc.chunks.is_empty() {
            continue;
        }
        let pieces = split_recursive(&doc.content, separators, chunk_size);
        if pieces.is_empty() {
            continue;
        }
        doc.chunks = assemble(pieces, overlap, &doc.labels);
        doc.meta.chunker = config.resolved_json();
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// Generic recursive character splitter.
pub struct RecursiveChunker;

impl Component for RecursiveChunker {
    fn name(&self) -> &str {
        "Recursive"
    }

    fn description(&self) -> &str {
        "Recursively splits text by an ordered separator list until every chunk fits"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Chunk Size".to_string(),
                FieldSchema::number(500, "Maximum characters per chunk"),
            ),
            (
                "Overlap".to_string(),
                FieldSchema::number(50, "Characters carried over from the previous chunk"),
            ),
            (
                "Separators".to_string(),
                FieldSchema::multi(
                    &DEFAULT_SEPARATORS,
                    &DEFAULT_SEPARATORS,
                    "Separators tried in order; the empty separator splits by character",
                ),
            ),
        ])
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let separators = config.field("Separators")?.as_list()?.to_vec();
        run_split(config, docs, &separators).await
    }
}

const LANGUAGES: [&str; 5] = ["python", "rust", "javascript", "go", "generic"];

fn language_separators(language: &str) -> Vec<String> {
    let prefix: &[&str] = match language {
        "python" => &["\nclass ", "\ndef ", "\n    def "],
        "rust" => &["\nfn ", "\nimpl ", "\nstruct ", "\nenum ", "\nmod "],
        "javascript" => &["\nfunction ", "\nclass ", "\nconst ", "\nexport "],
        "go" => &["\nfunc ", "\ntype ", "\nvar "],
        _ => &[],
    };
    prefix
        .iter()
        .chain(DEFAULT_SEPARATORS.iter())
        .map(|s| s.to_string())
        .collect()
}

/// Recursive splitter with language-aware top-level separators chosen
/// by a language tag; unrecognized tags degrade to the generic list.
pub struct CodeChunker;

impl Component for CodeChunker {
    fn name(&self) -> &str {
        "Code"
    }

    fn description(&self) -> &str {
        "Splits source code at declaration boundaries for the selected language"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Chunk Size".to_string(),
                FieldSchema::number(800, "Maximum characters per chunk"),
            ),
            (
                "Overlap".to_string(),
                FieldSchema::number(0, "Characters carried over from the previous chunk"),
            ),
            (
                "Language".to_string(),
                FieldSchema::dropdown("generic", &LANGUAGES, "Language tag selecting separators"),
            ),
        ])
    }
}

#[async_trait]
impl Chunker for CodeChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let language = config.str_field("Language")?.to_string();
        run_split(config, docs, &language_separators(&language)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn small_text_is_untouched() {
        let pieces = split_recursive("short text", &seps(&DEFAULT_SEPARATORS), 100);
        assert_eq!(pieces, vec!["short text"]);
    }

    #[test]
    fn splits_on_paragraphs_first() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird";
        let pieces = split_recursive(text, &seps(&DEFAULT_SEPARATORS), 20);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], "first paragraph");
    }

    #[test]
    fn recurses_when_paragraph_is_oversized() {
        let text = "word ".repeat(40);
        let pieces = split_recursive(&text, &seps(&DEFAULT_SEPARATORS), 30);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 30);
        }
    }

    #[test]
    fn empty_separator_hard_splits() {
        let pieces = split_recursive("abcdefghij", &seps(&[""]), 4);
        assert_eq!(pieces, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn assemble_carries_overlap_into_content_only() {
        let pieces = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let chunks = assemble(pieces, 4, &[]);
        assert_eq!(chunks[1].content_without_overlap, "gamma delta");
        assert!(chunks[1].content.starts_with("beta"));
        assert!(chunks[0].start_i.is_none());
    }

    #[test]
    fn rust_separators_split_at_functions() {
        let code = "fn main() { body(); }\nfn helper() { other(); }\nfn third() { more(); }";
        let pieces = split_recursive(code, &language_separators("rust"), 30);
        assert!(pieces.len() >= 2);
    }
}
