//! Storage abstraction over an external vector + keyword store.
//!
//! The [`VectorStore`] trait defines the generic object-store
//! operations (collection lifecycle, object CRUD, hybrid search); the
//! free functions below implement the service-level contract on top:
//! document/chunk persistence with post-insert verification and
//! rollback, cascade deletion, and the persisted RAG-config blob.
//!
//! Implementations must be `Send + Sync`; every call is an await point.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, VerbaError};
use crate::models::{Chunk, Document};

/// Collection holding one record per ingested document.
pub const DOCUMENTS_COLLECTION: &str = "VERBA_DOCUMENTS";
/// Collection holding the persisted RAG-config blob.
pub const CONFIG_COLLECTION: &str = "VERBA_CONFIG";
/// Collection reserved for query autocomplete suggestions.
pub const SUGGESTION_COLLECTION: &str = "VERBA_SUGGESTION";
/// Prefix shared by every collection the service owns.
pub const COLLECTION_PREFIX: &str = "VERBA_";

/// Fixed identifier under which the RAG-config blob is stored.
pub const CONFIG_UUID: &str = "00000000-0000-0000-0000-000000000001";

/// Replace every non-alphanumeric character with `_`.
///
/// Used to derive collection names from embedding model names so each
/// model's vectors live in their own collection (vectors from
/// different models differ in space and commonly in dimensionality).
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Chunk collection name for an embedding model.
pub fn embedding_collection(model: &str) -> String {
    format!("VERBA_Embedding_{}", slug(model))
}

/// Answer-cache collection name for an embedding model.
pub fn cache_collection(model: &str) -> String {
    format!("VERBA_Cache_{}", slug(model))
}

/// Property-equality filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Property equals the given JSON value.
    Eq(String, Value),
    /// A list-valued property intersects the given set.
    ContainsAny(String, Vec<String>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(property.to_string(), value.into())
    }
}

/// Sort directive for [`VectorStore::fetch`].
#[derive(Debug, Clone)]
pub struct Sort {
    pub property: String,
    pub ascending: bool,
}

/// An object returned from the store. `score` is only meaningful for
/// query results: the fused relative score for hybrid queries, the
/// cosine distance for [`VectorStore::vector_query`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub uuid: String,
    pub properties: Value,
    pub vector: Option<Vec<f32>>,
    pub score: f64,
}

impl StoredObject {
    pub fn str_prop(&self, name: &str) -> &str {
        self.properties.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn int_prop(&self, name: &str) -> Option<i64> {
        self.properties.get(name).and_then(Value::as_i64)
    }
}

/// Abstract store backend.
///
/// Hybrid queries fuse BM25-style keyword scores with vector cosine
/// similarity via relative-score (min-max) normalization; results are
/// ordered by descending fused score with ties broken by insertion
/// order. When `vector` is absent the query is keyword-only.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Liveness probe used by `/health` and at startup.
    async fn is_live(&self) -> bool;

    /// Idempotent create-if-absent.
    async fn verify_collection(&self, name: &str) -> Result<()>;

    async fn collections(&self) -> Result<Vec<String>>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert one object; the store assigns and returns its UUID.
    async fn insert(
        &self,
        collection: &str,
        properties: Value,
        vector: Option<Vec<f32>>,
    ) -> Result<String>;

    /// Insert one object under a caller-chosen UUID.
    async fn insert_with_id(
        &self,
        collection: &str,
        uuid: &str,
        properties: Value,
        vector: Option<Vec<f32>>,
    ) -> Result<()>;

    /// Batched write with a per-object vector override.
    async fn batch_insert(
        &self,
        collection: &str,
        objects: Vec<(Value, Vec<f32>)>,
    ) -> Result<Vec<String>>;

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize>;

    async fn delete(&self, collection: &str, uuid: &str) -> Result<bool>;

    /// Delete every object matching the filter; returns the count.
    async fn delete_matching(&self, collection: &str, filter: &Filter) -> Result<usize>;

    async fn fetch(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredObject>>;

    async fn fetch_by_id(&self, collection: &str, uuid: &str) -> Result<Option<StoredObject>>;

    /// BM25 + vector relative-score fusion; keyword-only when `vector`
    /// is `None`.
    async fn hybrid_query(
        &self,
        collection: &str,
        query: &str,
        vector: Option<&[f32]>,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredObject>>;

    /// Pure vector nearest-neighbor query; `score` is cosine distance.
    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<StoredObject>>;
}

/// Ensure the base collections exist.
pub async fn verify_base_collections(store: &dyn VectorStore) -> Result<()> {
    store.verify_collection(DOCUMENTS_COLLECTION).await?;
    store.verify_collection(CONFIG_COLLECTION).await?;
    store.verify_collection(SUGGESTION_COLLECTION).await?;
    Ok(())
}

/// Ensure a chunk collection exists for every reachable embedding
/// model. `models` is the union of every available embedder's `Model`
/// dropdown choices.
pub async fn verify_embedding_collections(
    store: &dyn VectorStore,
    models: &[String],
) -> Result<()> {
    for model in models {
        store.verify_collection(&embedding_collection(model)).await?;
    }
    Ok(())
}

fn document_properties(doc: &Document) -> Value {
    serde_json::json!({
        "title": doc.title,
        "content": doc.content,
        "extension": doc.extension,
        "file_size": doc.file_size,
        "labels": doc.labels,
        "source": doc.source,
        "meta": serde_json::to_string(&doc.meta).unwrap_or_default(),
        "metadata": doc.metadata,
        "created_at": chrono::Utc::now().to_rfc3339(),
    })
}

fn chunk_properties(chunk: &Chunk, doc: &Document, doc_uuid: &str) -> Value {
    serde_json::json!({
        "content": chunk.content,
        "content_without_overlap": chunk.content_without_overlap,
        "chunk_id": chunk.chunk_id,
        "start_i": chunk.start_i,
        "end_i": chunk.end_i,
        "doc_uuid": doc_uuid,
        "doc_name": doc.title,
        "labels": chunk.labels,
        "pca": chunk.pca,
    })
}

/// Insert a document record and return its UUID.
pub async fn insert_document(store: &dyn VectorStore, doc: &Document) -> Result<String> {
    store
        .insert(DOCUMENTS_COLLECTION, document_properties(doc), None)
        .await
}

/// Look up a document by exact title.
pub async fn exists_document_with_title(
    store: &dyn VectorStore,
    title: &str,
) -> Result<Option<String>> {
    let hits = store
        .fetch(
            DOCUMENTS_COLLECTION,
            Some(&Filter::eq("title", title)),
            None,
            1,
            0,
        )
        .await?;
    Ok(hits.into_iter().next().map(|o| o.uuid))
}

/// Write all of a document's chunks (with their vectors) into the
/// embedding collection for `model`, then verify the stored count.
/// On a count mismatch the document and every inserted chunk are
/// deleted and the call fails with `IngestMismatch`.
pub async fn batch_insert_chunks(
    store: &dyn VectorStore,
    model: &str,
    doc: &Document,
    doc_uuid: &str,
) -> Result<()> {
    let collection = embedding_collection(model);
    store.verify_collection(&collection).await?;

    let mut objects = Vec::with_capacity(doc.chunks.len());
    for chunk in &doc.chunks {
        let vector = chunk.vector.clone().ok_or_else(|| {
            VerbaError::Store(format!(
                "chunk {} of '{}' has no vector at insert time",
                chunk.chunk_id, doc.title
            ))
        })?;
        objects.push((chunk_properties(chunk, doc, doc_uuid), vector));
    }
    let expected = objects.len();
    store.batch_insert(&collection, objects).await?;

    let found = store
        .count(&collection, Some(&Filter::eq("doc_uuid", doc_uuid)))
        .await?;
    if found != expected {
        store.delete(DOCUMENTS_COLLECTION, doc_uuid).await?;
        store
            .delete_matching(&collection, &Filter::eq("doc_uuid", doc_uuid))
            .await?;
        return Err(VerbaError::IngestMismatch { expected, found });
    }
    Ok(())
}

/// Delete a document and cascade to its chunks. The chunk collection
/// is identified by the embedder recorded in the document's `meta`.
pub async fn delete_document(store: &dyn VectorStore, uuid: &str) -> Result<()> {
    let Some(doc) = store.fetch_by_id(DOCUMENTS_COLLECTION, uuid).await? else {
        return Ok(());
    };

    let meta_raw = doc.str_prop("meta").to_string();
    store.delete(DOCUMENTS_COLLECTION, uuid).await?;

    // The embedder entry pins the model, which pins the collection.
    let model = serde_json::from_str::<Value>(&meta_raw)
        .ok()
        .and_then(|m| {
            m.get("Embedder")
                .and_then(|e| e.get("config"))
                .and_then(|c| c.get("Model"))
                .and_then(|f| f.get("value"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    let filter = Filter::eq("doc_uuid", uuid);
    match model {
        Some(model) => {
            store
                .delete_matching(&embedding_collection(&model), &filter)
                .await?;
        }
        None => {
            // Meta does not identify the embedder; sweep every
            // embedding collection.
            for name in store.collections().await? {
                if name.starts_with("VERBA_Embedding_") {
                    store.delete_matching(&name, &filter).await?;
                }
            }
        }
    }
    Ok(())
}

/// Load the persisted RAG-config blob, if any.
pub async fn get_config(store: &dyn VectorStore) -> Result<Option<Value>> {
    let obj = store.fetch_by_id(CONFIG_COLLECTION, CONFIG_UUID).await?;
    Ok(obj.and_then(|o| {
        o.properties
            .get("config")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
    }))
}

/// Persist the RAG-config blob under the fixed identifier
/// (compare-and-set by delete + insert).
pub async fn set_config(store: &dyn VectorStore, blob: &Value) -> Result<()> {
    store.verify_collection(CONFIG_COLLECTION).await?;
    store.delete(CONFIG_COLLECTION, CONFIG_UUID).await?;
    let properties = serde_json::json!({ "config": blob.to_string() });
    store
        .insert_with_id(CONFIG_COLLECTION, CONFIG_UUID, properties, None)
        .await
}

/// Delete the persisted RAG-config blob.
pub async fn delete_config(store: &dyn VectorStore) -> Result<()> {
    store.delete(CONFIG_COLLECTION, CONFIG_UUID).await?;
    Ok(())
}

/// Delete every VERBA-prefixed collection.
pub async fn reset_all(store: &dyn VectorStore) -> Result<()> {
    for name in store.collections().await? {
        if name.starts_with(COLLECTION_PREFIX) {
            store.delete_collection(&name).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_replaces_non_alphanumerics() {
        assert_eq!(slug("text-embedding-3-small"), "text_embedding_3_small");
        assert_eq!(slug("nomic embed v1.5"), "nomic_embed_v1_5");
        assert_eq!(slug("plain"), "plain");
    }

    #[test]
    fn embedding_collection_is_prefixed() {
        assert_eq!(
            embedding_collection("all-minilm"),
            "VERBA_Embedding_all_minilm"
        );
        assert!(embedding_collection("x").starts_with(COLLECTION_PREFIX));
    }
}
