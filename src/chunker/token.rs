//! Fixed-size token window chunker.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::Document;
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{clamp_overlap, window_chunks, Chunker};

/// Splits documents into windows of whitespace-separated tokens with a
/// configurable overlap. Offsets are reported in token units.
pub struct TokenChunker;

impl Component for TokenChunker {
    fn name(&self) -> &str {
        "Token"
    }

    fn description(&self) -> &str {
        "Splits documents into fixed-size token windows with overlap"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Tokens".to_string(),
                FieldSchema::number(250, "Number of tokens per chunk"),
            ),
            (
                "Overlap".to_string(),
                FieldSchema::number(50, "Tokens shared with the previous chunk"),
            ),
        ])
    }
}

#[async_trait]
impl Chunker for TokenChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let tokens = config.int_field("Tokens")?.max(0) as usize;
        let overlap = config.int_field("Overlap")?.max(0) as usize;
        let overlap = clamp_overlap(tokens, overlap, self.name());

        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let words: Vec<&str> = doc.content.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            let mut chunks = window_chunks(&words, tokens, overlap);
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

    fn doc(text: &str) -> Document {
        Document::from_text("t.txt", text.to_string(), "txt", vec![], "test", "")
            .into_iter()
            .next()
            .unwrap()
    }

    fn config_with(tokens: i64, overlap: i64) -> ComponentEntry {
        let mut entry = meta(&TokenChunker, "Chunker", &Env::default());
        entry.config.get_mut("Tokens").unwrap().value = crate::schema::FieldValue::Number(tokens);
        entry.config.get_mut("Overlap").unwrap().value = crate::schema::FieldValue::Number(overlap);
        entry
    }

    #[tokio::test]
    async fn chunk_ids_are_dense_from_zero() {
        let mut docs = vec![doc(&"word ".repeat(300))];
        TokenChunker
            .chunk(&config_with(50, 10), &mut docs, None)
            .await
            .unwrap();
        for (i, c) in docs[0].chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, i);
        }
        assert!(!docs[0].chunks.is_empty());
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let mut docs = vec![doc(&"word ".repeat(300))];
        let config = config_with(50, 10);
        TokenChunker.chunk(&config, &mut docs, None).await.unwrap();
        let first = docs[0].chunks.len();
        TokenChunker.chunk(&config, &mut docs, None).await.unwrap();
        assert_eq!(docs[0].chunks.len(), first);
    }

    #[tokio::test]
    async fn zero_tokens_yields_whole_document() {
        let mut docs = vec![doc("a few words only")];
        TokenChunker
            .chunk(&config_with(0, 0), &mut docs, None)
            .await
            .unwrap();
        assert_eq!(docs[0].chunks.len(), 1);
        assert_eq!(docs[0].chunks[0].content, "a few words only");
    }

    #[tokio::test]
    async fn meta_records_resolved_config() {
        let mut docs = vec![doc("a b c d e")];
        TokenChunker
            .chunk(&config_with(2, 0), &mut docs, None)
            .await
            .unwrap();
        assert_eq!(docs[0].meta.chunker["name"], "Token");
    }
}
