//! Structure-aware JSON chunker.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::embedder::Embedder;
use crate::error::{Result, VerbaError};
use crate::models::{Chunk, Document};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::Chunker;

/// Serialize `value` compactly; objects and arrays small enough to fit
/// the budget become a single piece, larger ones are split per key or
/// element, recursively.
fn split_value(path: &str, value: &Value, budget: usize, out: &mut Vec<String>) {
    let rendered = render(path, value);
    if rendered.chars().count() <= budget {
        out.push(rendered);
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                split_value(&child_path, child, budget, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let child_path = if path.is_empty() {
                    format!("[{i}]")
                } else {
                    format!("{path}[{i}]")
                };
                split_value(&child_path, child, budget, out);
            }
        }
        // scalars over budget are kept whole, a hard split would
        // produce invalid fragments
        _ => out.push(rendered),
    }
}

fn render(path: &str, value: &Value) -> String {
    let body = serde_json::to_string(value).unwrap_or_default();
    if path.is_empty() {
        body
    } else {
        format!("{path}: {body}")
    }
}

/// Splits JSON documents along their structure, keying each chunk by
/// its path. Documents that fail to parse are rejected.
pub struct JsonChunker;

impl Component for JsonChunker {
    fn name(&self) -> &str {
        "JSON"
    }

    fn description(&self) -> &str {
        "Splits JSON documents per key or element, keeping values intact"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([(
            "Max Chunk Size".to_string(),
            FieldSchema::number(1000, "Maximum characters per chunk"),
        )])
    }
}

#[async_trait]
impl Chunker for JsonChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let budget = config.int_field("Max Chunk Size")?.max(1) as usize;

        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&doc.content).map_err(|e| {
                VerbaError::Chunk(format!("document '{}' is not valid JSON: {e}", doc.title))
            })?;

            let mut pieces = Vec::new();
            split_value("", &value, budget, &mut pieces);

            let mut chunks = Vec::with_capacity(pieces.len());
            for (i, piece) in pieces.into_iter().enumerate() {
                let mut chunk = Chunk::new(i, piece.clone(), piece);
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

    fn doc(json: &str) -> Vec<Document> {
        Document::from_text("d.json", json.to_string(), "json", vec![], "test", "")
    }

    fn config_with_budget(budget: i64) -> ComponentEntry {
        let mut entry = meta(&JsonChunker, "Chunker", &Env::default());
        entry.config.get_mut("Max Chunk Size").unwrap().value = FieldValue::Number(budget);
        entry
    }

    #[tokio::test]
    async fn small_document_is_one_chunk() {
        let mut docs = doc(r#"{"a": 1, "b": 2}"#);
        JsonChunker
            .chunk(&config_with_budget(1000), &mut docs, None)
            .await
            .unwrap();
        assert_eq!(docs[0].chunks.len(), 1);
    }

    #[tokio::test]
    async fn oversized_object_splits_per_key() {
        let long = "x".repeat(60);
        let json = format!(r#"{{"first": "{long}", "second": "{long}", "third": "{long}"}}"#);
        let mut docs = doc(&json);
        JsonChunker
            .chunk(&config_with_budget(80), &mut docs, None)
            .await
            .unwrap();
        let chunks = &docs[0].chunks;
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("first: "));
    }

    #[tokio::test]
    async fn nested_paths_are_dotted() {
        let long = "y".repeat(60);
        let json = format!(r#"{{"outer": {{"inner_a": "{long}", "inner_b": "{long}"}}}}"#);
        let mut docs = doc(&json);
        JsonChunker
            .chunk(&config_with_budget(80), &mut docs, None)
            .await
            .unwrap();
        assert!(docs[0]
            .chunks
            .iter()
            .any(|c| c.content.starts_with("outer.inner_a: ")));
    }

    #[tokio::test]
    async fn array_elements_are_indexed() {
        let long = "z".repeat(60);
        let json = format!(r#"["{long}", "{long}"]"#);
        let mut docs = doc(&json);
        JsonChunker
            .chunk(&config_with_budget(80), &mut docs, None)
            .await
            .unwrap();
        assert!(docs[0].chunks[0].content.starts_with("[0]: "));
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let mut docs = doc("{not json");
        let err = JsonChunker
            .chunk(&config_with_budget(100), &mut docs, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerbaError::Chunk(_)));
        assert!(docs[0].chunks.is_empty());
    }
}
