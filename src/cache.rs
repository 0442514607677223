//! Semantic answer cache.
//!
//! Finished answers are stored alongside the query's embedding in a
//! per-model cache collection. A new query whose embedding lands
//! within [`CACHE_DISTANCE_THRESHOLD`] of a cached one reuses the
//! stored answer instead of calling the generator.

use crate::error::Result;
use crate::store::{cache_collection, VectorStore};

/// Maximum cosine distance between query embeddings for a cache hit.
/// An identical query has distance 0.
pub const CACHE_DISTANCE_THRESHOLD: f64 = 0.04;

/// Look up a cached answer for a query embedding. Returns the stored
/// answer on a hit.
pub async fn check(
    store: &dyn VectorStore,
    model: &str,
    vector: &[f32],
) -> Result<Option<String>> {
    let collection = cache_collection(model);
    store.verify_collection(&collection).await?;

    let hits = store.vector_query(&collection, vector, None, 1).await?;
    match hits.first() {
        Some(hit) if hit.score <= CACHE_DISTANCE_THRESHOLD => {
            tracing::debug!(model, distance = hit.score, "answer cache hit");
            Ok(Some(hit.str_prop("answer").to_string()))
        }
        _ => Ok(None),
    }
}

/// Store a finished answer under the query's embedding.
pub async fn store_answer(
    store: &dyn VectorStore,
    model: &str,
    query: &str,
    answer: &str,
    vector: Vec<f32>,
) -> Result<()> {
    let collection = cache_collection(model);
    store.verify_collection(&collection).await?;
    store
        .insert(
            &collection,
            serde_json::json!({
                "query": query,
                "answer": answer,
                "cached_at": chrono::Utc::now().to_rfc3339(),
            }),
            Some(vector),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn exact_vector_hits() {
        let store = InMemoryStore::new();
        store_answer(&store, "m", "what is rust", "a language", vec![1.0, 0.0])
            .await
            .unwrap();
        let hit = check(&store, "m", &[1.0, 0.0]).await.unwrap();
        assert_eq!(hit.as_deref(), Some("a language"));
    }

    #[tokio::test]
    async fn near_vector_hits_within_threshold() {
        let store = InMemoryStore::new();
        store_answer(&store, "m", "q", "cached", vec![1.0, 0.0]).await.unwrap();
        // distance 1 - cos(theta) ~ 0.02 for this vector
        let hit = check(&store, "m", &[1.0, 0.2]).await.unwrap();
        assert_eq!(hit.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn distant_vector_misses() {
        let store = InMemoryStore::new();
        store_answer(&store, "m", "q", "cached", vec![1.0, 0.0]).await.unwrap();
        let miss = check(&store, "m", &[0.0, 1.0]).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn caches_are_per_model() {
        let store = InMemoryStore::new();
        store_answer(&store, "model-a", "q", "cached", vec![1.0, 0.0])
            .await
            .unwrap();
        let miss = check(&store, "model-b", &[1.0, 0.0]).await.unwrap();
        assert!(miss.is_none());
    }
}
