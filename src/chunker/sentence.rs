//! Sentence window chunker.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::Document;
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{clamp_overlap, split_sentences, window_chunks, Chunker};

/// Same window policy as the token chunker, but segmentation is at
/// sentence boundaries and offsets are reported in sentence units.
pub struct SentenceChunker;

impl Component for SentenceChunker {
    fn name(&self) -> &str {
        "Sentence"
    }

    fn description(&self) -> &str {
        "Splits documents into windows of whole sentences with overlap"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Sentences".to_string(),
                FieldSchema::number(10, "Number of sentences per chunk"),
            ),
            (
                "Overlap".to_string(),
                FieldSchema::number(1, "Sentences shared with the previous chunk"),
            ),
        ])
    }
}

#[async_trait]
impl Chunker for SentenceChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let sentences = config.int_field("Sentences")?.max(0) as usize;
        let overlap = config.int_field("Overlap")?.max(0) as usize;
        let overlap = clamp_overlap(sentences, overlap, self.name());

        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let segmented = split_sentences(&doc.content);
            if segmented.is_empty() {
                continue;
            }
            let refs: Vec<&str> = segmented.iter().map(String::as_str).collect();
            let mut chunks = window_chunks(&refs, sentences, overlap);
            for chunk in &mut chunks {
                chunk.labels = doc.labels.clone();
            }
            doc.chunks = chunks;
            doc.meta.chunker = config.resolved_json();
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{meta, Env};
    use crate::schema::FieldValue;

    #[tokio::test]
    async fn windows_are_sentence_aligned() {
        let text = (0..12)
            .map(|i| format!("Sentence number {i}."))
            .collect::<Vec<_>>()
            .join(" ");
        let mut docs =
            Document::from_text("s.txt", text, "txt", vec![], "test", "");

        let mut config = meta(&SentenceChunker, "Chunker", &Env::default());
        config.config.get_mut("Sentences").unwrap().value = FieldValue::Number(4);
        config.config.get_mut("Overlap").unwrap().value = FieldValue::Number(1);

        SentenceChunker.chunk(&config, &mut docs, None).await.unwrap();
        let chunks = &docs[0].chunks;
        // ceil((12 - 1) / 3) = 4
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].content.starts_with("Sentence number 0."));
        assert_eq!(chunks[0].start_i, Some(0));
        assert_eq!(chunks[1].start_i, Some(3));
    }
}
