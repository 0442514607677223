//! Chunk retrievers.
//!
//! A [`Retriever`] runs a hybrid query against one embedding-model
//! collection and assembles the context string handed to the
//! generator. The window retriever widens each hit with its
//! neighboring chunks so the generator sees continuous passages.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::generator::CHARS_PER_TOKEN;
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};
use crate::store::{Filter, StoredObject, VectorStore};

/// One chunk selected for a query, as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub uuid: String,
    pub doc_uuid: String,
    pub doc_name: String,
    pub chunk_id: usize,
    pub content: String,
    pub score: f64,
}

impl RetrievedChunk {
    fn from_stored(obj: &StoredObject) -> Self {
        Self {
            uuid: obj.uuid.clone(),
            doc_uuid: obj.str_prop("doc_uuid").to_string(),
            doc_name: obj.str_prop("doc_name").to_string(),
            chunk_id: obj.int_prop("chunk_id").unwrap_or_default() as usize,
            content: obj.str_prop("content").to_string(),
            score: obj.score,
        }
    }
}

/// A pluggable retrieval strategy.
#[async_trait]
pub trait Retriever: Component {
    /// Retrieve chunks for `query` from `collection` and build the
    /// generator context. `labels` and `doc_uuids` narrow the search
    /// when non-empty.
    async fn retrieve(
        &self,
        config: &ComponentEntry,
        query: &str,
        vector: &[f32],
        store: &dyn VectorStore,
        collection: &str,
        labels: &[String],
        doc_uuids: &[String],
    ) -> Result<(Vec<RetrievedChunk>, String)>;
}

fn scope_filter(labels: &[String], doc_uuids: &[String]) -> Option<Filter> {
    let mut clauses = Vec::new();
    if !labels.is_empty() {
        clauses.push(Filter::ContainsAny("labels".to_string(), labels.to_vec()));
    }
    if !doc_uuids.is_empty() {
        clauses.push(Filter::Or(
            doc_uuids.iter().map(|u| Filter::eq("doc_uuid", u.as_str())).collect(),
        ));
    }
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(Filter::And(clauses)),
    }
}

/// Order chunks by document, then by position within the document,
/// and join their contents into the context string.
fn assemble_context(chunks: &mut Vec<RetrievedChunk>) -> String {
    chunks.sort_by(|a, b| {
        a.doc_uuid
            .cmp(&b.doc_uuid)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut the context to a token budget, approximated at
/// [`CHARS_PER_TOKEN`] characters per token, on a char boundary.
pub fn truncate_context(context: &str, max_tokens: usize) -> String {
    let budget = max_tokens * CHARS_PER_TOKEN;
    if context.chars().count() <= budget {
        return context.to_string();
    }
    context.chars().take(budget).collect()
}

/// Plain top-k hybrid retrieval.
pub struct SimpleRetriever;

impl Component for SimpleRetriever {
    fn name(&self) -> &str {
        "Simple"
    }

    fn description(&self) -> &str {
        "Returns the top scoring chunks without neighborhood expansion"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([(
            "Limit".to_string(),
            FieldSchema::number(10, "Number of chunks to retrieve"),
        )])
    }
}

#[async_trait]
impl Retriever for SimpleRetriever {
    async fn retrieve(
        &self,
        config: &ComponentEntry,
        query: &str,
        vector: &[f32],
        store: &dyn VectorStore,
        collection: &str,
        labels: &[String],
        doc_uuids: &[String],
    ) -> Result<(Vec<RetrievedChunk>, String)> {
        let limit = config.int_field("Limit")?.max(1) as usize;
        let filter = scope_filter(labels, doc_uuids);

        let hits = store
            .hybrid_query(collection, query, Some(vector), filter.as_ref(), limit, 0)
            .await?;
        let mut chunks: Vec<RetrievedChunk> =
            hits.iter().map(RetrievedChunk::from_stored).collect();
        let context = assemble_context(&mut chunks);
        Ok((chunks, context))
    }
}

/// Hybrid retrieval widened with the neighboring chunks of every hit.
pub struct WindowRetriever;

impl Component for WindowRetriever {
    fn name(&self) -> &str {
        "Window"
    }

    fn description(&self) -> &str {
        "Expands each retrieved chunk with its neighbors in the document"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Limit".to_string(),
                FieldSchema::number(8, "Number of chunks to retrieve"),
            ),
            (
                "Window".to_string(),
                FieldSchema::number(2, "Neighbor chunks fetched on each side of a hit"),
            ),
        ])
    }
}

#[async_trait]
impl Retriever for WindowRetriever {
    async fn retrieve(
        &self,
        config: &ComponentEntry,
        query: &str,
        vector: &[f32],
        store: &dyn VectorStore,
        collection: &str,
        labels: &[String],
        doc_uuids: &[String],
    ) -> Result<(Vec<RetrievedChunk>, String)> {
        let limit = config.int_field("Limit")?.max(1) as usize;
        let window = config.int_field("Window")?.max(0) as usize;
        let filter = scope_filter(labels, doc_uuids);

        let hits = store
            .hybrid_query(collection, query, Some(vector), filter.as_ref(), limit, 0)
            .await?;
        let mut chunks: Vec<RetrievedChunk> =
            hits.iter().map(RetrievedChunk::from_stored).collect();

        // Wanted neighbor ids per document, minus what the query
        // already returned.
        let mut present: HashMap<String, HashSet<usize>> = HashMap::new();
        for chunk in &chunks {
            present
                .entry(chunk.doc_uuid.clone())
                .or_default()
                .insert(chunk.chunk_id);
        }
        let mut wanted: HashMap<String, HashSet<usize>> = HashMap::new();
        for chunk in &chunks {
            let lo = chunk.chunk_id.saturating_sub(window);
            for id in lo..=chunk.chunk_id + window {
                if !present[&chunk.doc_uuid].contains(&id) {
                    wanted.entry(chunk.doc_uuid.clone()).or_default().insert(id);
                }
            }
        }

        for (doc_uuid, ids) in wanted {
            if ids.is_empty() {
                continue;
            }
            let id_filter = Filter::Or(
                ids.iter()
                    .map(|id| Filter::eq("chunk_id", Value::from(*id)))
                    .collect(),
            );
            let neighbor_filter = Filter::And(vec![
                Filter::eq("doc_uuid", doc_uuid.as_str()),
                id_filter,
            ]);
            let neighbors = store
                .fetch(collection, Some(&neighbor_filter), None, ids.len(), 0)
                .await?;
            chunks.extend(neighbors.iter().map(RetrievedChunk::from_stored));
        }

        let context = assemble_context(&mut chunks);
        Ok((chunks, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{meta, Env};
    use crate::schema::FieldValue;
    use crate::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore, doc_uuid: &str, n: usize) {
        store.verify_collection("chunks").await.unwrap();
        for i in 0..n {
            let content = if i == 5 {
                "needle haystack match".to_string()
            } else {
                format!("filler passage number {i}")
            };
            store
                .insert(
                    "chunks",
                    serde_json::json!({
                        "content": content,
                        "chunk_id": i,
                        "doc_uuid": doc_uuid,
                        "doc_name": "doc.txt",
                        "labels": [],
                    }),
                    Some(vec![if i == 5 { 1.0 } else { 0.0 }, 1.0]),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn window_adds_missing_neighbors() {
        let store = InMemoryStore::new();
        seed(&store, "d1", 12).await;

        let mut config = meta(&WindowRetriever, "Retriever", &Env::default());
        config.config.get_mut("Limit").unwrap().value = FieldValue::Number(1);
        config.config.get_mut("Window").unwrap().value = FieldValue::Number(2);

        let (chunks, context) = WindowRetriever
            .retrieve(&config, "needle", &[1.0, 1.0], &store, "chunks", &[], &[])
            .await
            .unwrap();

        let ids: Vec<usize> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![3, 4, 5, 6, 7]);
        let pos_needle = context.find("needle").unwrap();
        let pos_before = context.find("filler passage number 4").unwrap();
        assert!(pos_before < pos_needle);
    }

    #[tokio::test]
    async fn simple_respects_limit_and_order() {
        let store = InMemoryStore::new();
        seed(&store, "d1", 12).await;

        let mut config = meta(&SimpleRetriever, "Retriever", &Env::default());
        config.config.get_mut("Limit").unwrap().value = FieldValue::Number(3);

        let (chunks, _) = SimpleRetriever
            .retrieve(&config, "needle", &[1.0, 1.0], &store, "chunks", &[], &[])
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            assert!(pair[0].chunk_id <= pair[1].chunk_id);
        }
    }

    #[tokio::test]
    async fn document_filter_narrows_results() {
        let store = InMemoryStore::new();
        seed(&store, "d1", 6).await;
        seed(&store, "d2", 6).await;

        let mut config = meta(&SimpleRetriever, "Retriever", &Env::default());
        config.config.get_mut("Limit").unwrap().value = FieldValue::Number(10);

        let (chunks, _) = SimpleRetriever
            .retrieve(
                &config,
                "needle",
                &[1.0, 1.0],
                &store,
                "chunks",
                &[],
                &["d2".to_string()],
            )
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.doc_uuid == "d2"));
    }

    #[test]
    fn truncation_is_a_char_budget() {
        let context = "x".repeat(100);
        assert_eq!(truncate_context(&context, 10).len(), 40);
        assert_eq!(truncate_context("short", 10), "short");
    }
}
