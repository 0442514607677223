//! In-memory [`VectorStore`] implementation, the reference backend.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread
//! safety. Keyword scoring is a term-match count over string
//! properties; vector search is brute-force cosine similarity. Hybrid
//! results fuse both channels with min-max relative-score
//! normalization, ties broken by insertion order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, VerbaError};

use super::{Filter, Sort, StoredObject, VectorStore};

struct Obj {
    uuid: String,
    properties: Value,
    vector: Option<Vec<f32>>,
    seq: u64,
}

/// In-memory store for tests and the embedded deployment mode.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Obj>>>,
    next_seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn matches(filter: &Filter, properties: &Value) -> bool {
    match filter {
        Filter::Eq(prop, value) => properties.get(prop) == Some(value),
        Filter::ContainsAny(prop, wanted) => properties
            .get(prop)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| wanted.iter().any(|w| w == s))
            })
            .unwrap_or(false),
        Filter::And(parts) => parts.iter().all(|f| matches(f, properties)),
        Filter::Or(parts) => parts.iter().any(|f| matches(f, properties)),
    }
}

/// Term-match score over every string-valued property. Zero means the
/// object is not a keyword candidate.
fn keyword_score(query: &str, properties: &Value) -> f64 {
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let mut haystack = String::new();
    if let Some(map) = properties.as_object() {
        for value in map.values() {
            if let Some(s) = value.as_str() {
                haystack.push_str(&s.to_lowercase());
                haystack.push(' ');
            }
        }
    }
    terms.iter().filter(|t| haystack.contains(t.as_str())).count() as f64
}

/// Min-max normalize to [0, 1]; a single candidate maps to 1.
fn normalize(scores: &[(usize, f64)]) -> HashMap<usize, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|(i, s)| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - min) / (max - min)
            };
            (*i, norm)
        })
        .collect()
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn is_live(&self) -> bool {
        true
    }

    async fn verify_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().unwrap();
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        properties: Value,
        vector: Option<Vec<f32>>,
    ) -> Result<String> {
        let uuid = Uuid::new_v4().to_string();
        self.insert_with_id(collection, &uuid, properties, vector)
            .await?;
        Ok(uuid)
    }

    async fn insert_with_id(
        &self,
        collection: &str,
        uuid: &str,
        properties: Value,
        vector: Option<Vec<f32>>,
    ) -> Result<()> {
        let seq = self.seq();
        let mut collections = self.collections.write().unwrap();
        let objs = collections.entry(collection.to_string()).or_default();
        objs.push(Obj {
            uuid: uuid.to_string(),
            properties,
            vector,
            seq,
        });
        Ok(())
    }

    async fn batch_insert(
        &self,
        collection: &str,
        objects: Vec<(Value, Vec<f32>)>,
    ) -> Result<Vec<String>> {
        let mut uuids = Vec::with_capacity(objects.len());
        for (properties, vector) in objects {
            uuids.push(self.insert(collection, properties, Some(vector)).await?);
        }
        Ok(uuids)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        let collections = self.collections.read().unwrap();
        let objs = collections
            .get(collection)
            .ok_or_else(|| VerbaError::Store(format!("unknown collection '{collection}'")))?;
        Ok(objs
            .iter()
            .filter(|o| filter.map(|f| matches(f, &o.properties)).unwrap_or(true))
            .count())
    }

    async fn delete(&self, collection: &str, uuid: &str) -> Result<bool> {
        let mut collections = self.collections.write().unwrap();
        let Some(objs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = objs.len();
        objs.retain(|o| o.uuid != uuid);
        Ok(objs.len() < before)
    }

    async fn delete_matching(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut collections = self.collections.write().unwrap();
        let Some(objs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = objs.len();
        objs.retain(|o| !matches(filter, &o.properties));
        Ok(before - objs.len())
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredObject>> {
        let collections = self.collections.read().unwrap();
        let Some(objs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<&Obj> = objs
            .iter()
            .filter(|o| filter.map(|f| matches(f, &o.properties)).unwrap_or(true))
            .collect();
        if let Some(sort) = sort {
            hits.sort_by(|a, b| {
                let av = a.properties.get(&sort.property);
                let bv = b.properties.get(&sort.property);
                let ord = compare_values(av, bv);
                if sort.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        } else {
            hits.sort_by_key(|o| o.seq);
        }
        Ok(hits
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|o| StoredObject {
                uuid: o.uuid.clone(),
                properties: o.properties.clone(),
                vector: o.vector.clone(),
                score: 0.0,
            })
            .collect())
    }

    async fn fetch_by_id(&self, collection: &str, uuid: &str) -> Result<Option<StoredObject>> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(collection).and_then(|objs| {
            objs.iter().find(|o| o.uuid == uuid).map(|o| StoredObject {
                uuid: o.uuid.clone(),
                properties: o.properties.clone(),
                vector: o.vector.clone(),
                score: 0.0,
            })
        }))
    }

    async fn hybrid_query(
        &self,
        collection: &str,
        query: &str,
        vector: Option<&[f32]>,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredObject>> {
        let collections = self.collections.read().unwrap();
        let Some(objs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let candidates: Vec<(usize, &Obj)> = objs
            .iter()
            .enumerate()
            .filter(|(_, o)| filter.map(|f| matches(f, &o.properties)).unwrap_or(true))
            .collect();

        let keyword: Vec<(usize, f64)> = candidates
            .iter()
            .filter_map(|(i, o)| {
                let s = keyword_score(query, &o.properties);
                (s > 0.0).then_some((*i, s))
            })
            .collect();

        let vectorized: Vec<(usize, f64)> = match vector {
            Some(qv) => candidates
                .iter()
                .filter_map(|(i, o)| {
                    o.vector
                        .as_ref()
                        .map(|v| (*i, cosine_sim(qv, v) as f64))
                })
                .collect(),
            None => Vec::new(),
        };

        let kw_norm = normalize(&keyword);
        let vec_norm = normalize(&vectorized);

        let mut fused: Vec<(u64, usize, f64)> = candidates
            .iter()
            .filter_map(|(i, o)| {
                let k = kw_norm.get(i);
                let v = vec_norm.get(i);
                if k.is_none() && v.is_none() {
                    return None;
                }
                let score = k.copied().unwrap_or(0.0) + v.copied().unwrap_or(0.0);
                Some((o.seq, *i, score))
            })
            .collect();

        fused.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(fused
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, i, score)| {
                let o = &objs[i];
                StoredObject {
                    uuid: o.uuid.clone(),
                    properties: o.properties.clone(),
                    vector: o.vector.clone(),
                    score,
                }
            })
            .collect())
    }

    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<StoredObject>> {
        let collections = self.collections.read().unwrap();
        let Some(objs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(f64, &Obj)> = objs
            .iter()
            .filter(|o| filter.map(|f| matches(f, &o.properties)).unwrap_or(true))
            .filter_map(|o| {
                o.vector
                    .as_ref()
                    .map(|v| (1.0 - cosine_sim(vector, v) as f64, o))
            })
            .collect();
        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(distance, o)| StoredObject {
                uuid: o.uuid.clone(),
                properties: o.properties.clone(),
                vector: o.vector.clone(),
                score: distance,
            })
            .collect())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            } else if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                x.cmp(y)
            } else {
                std::cmp::Ordering::Equal
            }
        }
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn verify_collection_is_idempotent() {
        let store = InMemoryStore::new();
        store.verify_collection("VERBA_TEST").await.unwrap();
        store
            .insert("VERBA_TEST", json!({"title": "a"}), None)
            .await
            .unwrap();
        store.verify_collection("VERBA_TEST").await.unwrap();
        assert_eq!(store.count("VERBA_TEST", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn filters_match_equality_and_label_intersection() {
        let store = InMemoryStore::new();
        store
            .insert("c", json!({"doc_uuid": "d1", "labels": ["a", "b"]}), None)
            .await
            .unwrap();
        store
            .insert("c", json!({"doc_uuid": "d2", "labels": ["c"]}), None)
            .await
            .unwrap();

        let eq = Filter::eq("doc_uuid", "d1");
        assert_eq!(store.count("c", Some(&eq)).await.unwrap(), 1);

        let any = Filter::ContainsAny("labels".into(), vec!["b".into(), "z".into()]);
        assert_eq!(store.count("c", Some(&any)).await.unwrap(), 1);

        let both = Filter::And(vec![eq, any]);
        assert_eq!(store.count("c", Some(&both)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn hybrid_keyword_only_ranks_by_term_matches() {
        let store = InMemoryStore::new();
        store
            .insert("c", json!({"content": "rust borrow checker"}), None)
            .await
            .unwrap();
        store
            .insert("c", json!({"content": "rust async runtime"}), None)
            .await
            .unwrap();
        store
            .insert("c", json!({"content": "python interpreter"}), None)
            .await
            .unwrap();

        let hits = store
            .hybrid_query("c", "rust borrow", None, None, 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].str_prop("content"), "rust borrow checker");
    }

    #[tokio::test]
    async fn hybrid_fuses_vector_channel() {
        let store = InMemoryStore::new();
        store
            .insert("c", json!({"content": "unrelated words"}), Some(vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .insert("c", json!({"content": "query words"}), Some(vec![0.0, 1.0]))
            .await
            .unwrap();

        // Vector points at the first object, keyword at the second;
        // both become candidates.
        let hits = store
            .hybrid_query("c", "query", Some(&[1.0, 0.0]), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn vector_query_returns_distance_ordered() {
        let store = InMemoryStore::new();
        store
            .insert("c", json!({"answer": "far"}), Some(vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .insert("c", json!({"answer": "near"}), Some(vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .vector_query("c", &[1.0, 0.0], None, 2)
            .await
            .unwrap();
        assert_eq!(hits[0].str_prop("answer"), "near");
        assert!(hits[0].score < 1e-6);
        assert!(hits[1].score > hits[0].score);
    }

    #[tokio::test]
    async fn delete_matching_removes_all() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .insert("c", json!({"doc_uuid": "d1", "chunk_id": i}), None)
                .await
                .unwrap();
        }
        store
            .insert("c", json!({"doc_uuid": "d2", "chunk_id": 0}), None)
            .await
            .unwrap();
        let removed = store
            .delete_matching("c", &Filter::eq("doc_uuid", "d1"))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count("c", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fetch_sorts_by_property() {
        let store = InMemoryStore::new();
        for id in [2, 0, 1] {
            store
                .insert("c", json!({"chunk_id": id}), None)
                .await
                .unwrap();
        }
        let sort = Sort {
            property: "chunk_id".into(),
            ascending: true,
        };
        let hits = store.fetch("c", None, Some(&sort), 10, 0).await.unwrap();
        let ids: Vec<i64> = hits.iter().filter_map(|o| o.int_prop("chunk_id")).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
