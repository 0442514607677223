//! Embedding-guided semantic chunker.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::embedder::{vectorize_checked, Embedder};
use crate::error::{Result, VerbaError};
use crate::models::{Chunk, Document};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{percentile, split_sentences, Chunker};

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

/// The text each sentence is embedded as: the sentence with one
/// neighbor of context on each side, so boundary scores reflect local
/// topic drift rather than single-sentence noise.
fn context_windows(sentences: &[String]) -> Vec<String> {
    (0..sentences.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(sentences.len());
            sentences[lo..hi].join(" ")
        })
        .collect()
}

/// Group sentence indices into chunks: a boundary opens where the
/// distance between consecutive windows exceeds the given threshold,
/// or where a group reaches `max_sentences`.
fn group_boundaries(distances: &[f32], threshold: f32, max_sentences: usize, n: usize) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut start = 0usize;
    for i in 1..n {
        let len = i - start;
        if distances[i - 1] > threshold || len >= max_sentences {
            groups.push((start, i));
            start = i;
        }
    }
    groups.push((start, n));
    groups
}

/// Splits documents where the embedding distance between neighboring
/// sentence windows spikes above a percentile of all boundary
/// distances. Requires an embedder at chunking time.
pub struct SemanticChunker;

impl Component for SemanticChunker {
    fn name(&self) -> &str {
        "Semantic"
    }

    fn description(&self) -> &str {
        "Splits documents at embedding-detected topic boundaries"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Breakpoint Percentile".to_string(),
                FieldSchema::number(80, "Boundary distances above this percentile start a new chunk"),
            ),
            (
                "Max Sentences".to_string(),
                FieldSchema::number(20, "Hard upper bound on sentences per chunk"),
            ),
        ])
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let Some((embedder, embedder_config)) = embedder else {
            return Err(VerbaError::Chunk(
                "the Semantic chunker needs an embedder".into(),
            ));
        };
        let p = config.int_field("Breakpoint Percentile")?.clamp(0, 100) as f64;
        let max_sentences = config.int_field("Max Sentences")?.max(1) as usize;

        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let sentences = split_sentences(&doc.content);
            if sentences.is_empty() {
                continue;
            }

            let groups = if sentences.len() == 1 {
                vec![(0usize, 1usize)]
            } else {
                let windows = context_windows(&sentences);
                let vectors = vectorize_checked(embedder, embedder_config, &windows).await?;
                let distances: Vec<f32> = vectors
                    .windows(2)
                    .map(|pair| cosine_distance(&pair[0], &pair[1]))
                    .collect();
                let threshold = percentile(&distances, p);
                group_boundaries(&distances, threshold, max_sentences, sentences.len())
            };

            let mut chunks = Vec::with_capacity(groups.len());
            for (i, (start, end)) in groups.into_iter().enumerate() {
                let content = sentences[start..end].join(" ");
                let mut chunk = Chunk::new(i, content.clone(), content).with_span(start, end);
                chunk.labels = doc.labels.clone();
                chunks.push(chunk);
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

    struct TopicEmbedder;

    impl Component for TopicEmbedder {
        fn name(&self) -> &str {
            "Topic"
        }
        fn description(&self) -> &str {
            "test embedder keyed on topic words"
        }
        fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
            BTreeMap::new()
        }
    }

    #[async_trait]
    impl Embedder for TopicEmbedder {
        async fn vectorize(
            &self,
            _config: &ComponentEntry,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let cats = t.matches("cats").count() as f32;
                    let tax = t.matches("taxes").count() as f32;
                    vec![cats, tax]
                })
                .collect())
        }
    }

    fn config() -> ComponentEntry {
        meta(&SemanticChunker, "Chunker", &Env::default())
    }

    #[tokio::test]
    async fn splits_at_topic_shift() {
        let text = "I like cats. My cats sleep all day. Those cats purr. \
                    Filing taxes is due. The taxes form is long. I paid my taxes.";
        let mut docs = Document::from_text("t.txt", text.to_string(), "txt", vec![], "test", "");

        let embedder = TopicEmbedder;
        let embedder_config = meta(&embedder, "Embedder", &Env::default());
        SemanticChunker
            .chunk(&config(), &mut docs, Some((&embedder, &embedder_config)))
            .await
            .unwrap();

        let chunks = &docs[0].chunks;
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.contains("cats"));
        assert!(!chunks[0].content.contains("taxes"));
        assert_eq!(chunks[0].start_i, Some(0));
    }

    #[tokio::test]
    async fn max_sentences_caps_group_size() {
        let text = (0..30)
            .map(|i| format!("Same topic sentence {i}."))
            .collect::<Vec<_>>()
            .join(" ");
        let mut docs = Document::from_text("t.txt", text, "txt", vec![], "test", "");

        let mut cfg = config();
        cfg.config.get_mut("Max Sentences").unwrap().value = FieldValue::Number(10);
        // percentile 100 disables distance splits, only the cap fires
        cfg.config.get_mut("Breakpoint Percentile").unwrap().value = FieldValue::Number(100);

        let embedder = TopicEmbedder;
        let embedder_config = meta(&embedder, "Embedder", &Env::default());
        SemanticChunker
            .chunk(&cfg, &mut docs, Some((&embedder, &embedder_config)))
            .await
            .unwrap();

        for chunk in &docs[0].chunks {
            let len = chunk.end_i.unwrap() - chunk.start_i.unwrap();
            assert!(len <= 10);
        }
    }

    #[tokio::test]
    async fn missing_embedder_is_an_error() {
        let mut docs =
            Document::from_text("t.txt", "One. Two.".to_string(), "txt", vec![], "test", "");
        let err = SemanticChunker
            .chunk(&config(), &mut docs, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerbaError::Chunk(_)));
    }
}
