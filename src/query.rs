//! The retrieval pipeline.
//!
//! One [`RetrievalPipeline::query`] call embeds the query, consults
//! the semantic answer cache, retrieves context and starts the answer
//! stream. The retrieval result (chunks and context) is available
//! immediately; tokens arrive on the returned channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cache;
use crate::embedder::vectorize_checked;
use crate::error::{Result, VerbaError};
use crate::generator::{ConversationEntry, TokenEvent};
use crate::registry::Registry;
use crate::retriever::{truncate_context, RetrievedChunk};
use crate::schema::RagConfig;
use crate::store::{embedding_collection, VectorStore};

/// A query as received from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub rag_config: RagConfig,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub document_filter: Vec<DocumentFilterEntry>,
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
}

/// One entry of the client's document allow-list.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentFilterEntry {
    #[serde(default)]
    pub title: String,
    pub uuid: String,
}

/// The retrieval half of a query answer, sent before tokens stream.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub documents: Vec<RetrievedChunk>,
    pub context: String,
    pub cached: bool,
    #[serde(skip)]
    pub model: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

pub struct RetrievalPipeline {
    store: Arc<dyn VectorStore>,
    registry: Arc<Registry>,
    cache_enabled: bool,
}

impl RetrievalPipeline {
    pub fn new(store: Arc<dyn VectorStore>, registry: Arc<Registry>, cache_enabled: bool) -> Self {
        Self {
            store,
            registry,
            cache_enabled,
        }
    }

    /// Answer a query. On a cache hit the stream carries the cached
    /// answer as its single terminal event and no retrieval runs.
    pub async fn query(
        &self,
        request: &QueryRequest,
    ) -> Result<(QueryResult, mpsc::Receiver<TokenEvent>)> {
        let embedder_entry = request.rag_config.embedder.selected_entry()?;
        let embedder = self.registry.embedder(&embedder_entry.name)?;
        let model = embedder_entry.str_field("Model")?.to_string();

        let vectors =
            vectorize_checked(embedder.as_ref(), embedder_entry, &[request.query.clone()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or(VerbaError::EmbeddingContract { expected: 1, got: 0 })?;

        if self.cache_enabled {
            if let Some(answer) = cache::check(self.store.as_ref(), &model, &vector).await? {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.send(TokenEvent::stop(answer)).await;
                return Ok((
                    QueryResult {
                        documents: Vec::new(),
                        context: String::new(),
                        cached: true,
                        model,
                        vector,
                    },
                    rx,
                ));
            }
        }

        let retriever_entry = request.rag_config.retriever.selected_entry()?;
        let retriever = self.registry.retriever(&retriever_entry.name)?;
        let doc_uuids: Vec<String> = request
            .document_filter
            .iter()
            .map(|e| e.uuid.clone())
            .collect();
        let (chunks, context) = retriever
            .retrieve(
                retriever_entry,
                &request.query,
                &vector,
                self.store.as_ref(),
                &embedding_collection(&model),
                &request.labels,
                &doc_uuids,
            )
            .await?;

        let generator_entry = request.rag_config.generator.selected_entry()?;
        let generator = self.registry.generator(&generator_entry.name)?;
        let context = truncate_context(&context, generator.context_window());

        let events = generator
            .generate_stream(
                generator_entry,
                &request.query,
                &context,
                &request.conversation,
            )
            .await?;

        Ok((
            QueryResult {
                documents: chunks,
                context,
                cached: false,
                model,
                vector,
            },
            events,
        ))
    }

    /// Store a finished answer in the semantic cache. Cached answers
    /// are never re-cached.
    pub async fn cache_answer(
        &self,
        result: &QueryResult,
        query: &str,
        answer: &str,
    ) -> Result<()> {
        if !self.cache_enabled || result.cached || answer.is_empty() {
            return Ok(());
        }
        cache::store_answer(
            self.store.as_ref(),
            &result.model,
            query,
            answer,
            result.vector.clone(),
        )
        .await
    }
}
