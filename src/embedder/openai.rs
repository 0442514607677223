//! OpenAI embeddings provider.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, VerbaError};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{post_with_retry, Embedder};

const MODELS: [&str; 3] = [
    "text-embedding-3-small",
    "text-embedding-3-large",
    "text-embedding-ada-002",
];

pub struct OpenAiEmbedder {
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for OpenAiEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for OpenAiEmbedder {
    fn name(&self) -> &str {
        "OpenAIEmbedder"
    }

    fn description(&self) -> &str {
        "Embeds text through the OpenAI embeddings API"
    }

    fn required_env(&self) -> Vec<String> {
        vec!["OPENAI_API_KEY".to_string()]
    }

    fn required_libs(&self) -> Vec<String> {
        vec!["OpenAI".to_string()]
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Model".to_string(),
                FieldSchema::dropdown(MODELS[0], &MODELS, "Embedding model"),
            ),
            (
                "URL".to_string(),
                FieldSchema::text("https://api.openai.com/v1", "API base URL"),
            ),
        ])
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn max_batch_size(&self) -> usize {
        128
    }

    async fn vectorize(
        &self,
        config: &ComponentEntry,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let model = config.str_field("Model")?;
        let base = config.str_field("URL")?.trim_end_matches('/');
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| VerbaError::Config("OPENAI_API_KEY is not set".into()))?;

        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });
        let url = format!("{base}/embeddings");
        let headers = [("Authorization", format!("Bearer {api_key}"))];
        let response = post_with_retry(&self.client, &url, &headers, &body).await?;

        let data = response
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| VerbaError::Embedding("response is missing 'data'".into()))?;
        data.iter()
            .map(|item| {
                let row = item
                    .get("embedding")
                    .ok_or_else(|| VerbaError::Embedding("item is missing 'embedding'".into()))?;
                super::parse_vectors(&serde_json::json!([row])).map(|mut v| v.remove(0))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{meta, Env};

    #[test]
    fn schema_lists_current_models() {
        let entry = meta(&OpenAiEmbedder::new(), "Embedder", &Env::default());
        let model = &entry.config["Model"];
        assert!(model.values.contains(&"text-embedding-3-small".to_string()));
        assert!(!entry.available);
    }

    #[test]
    fn available_with_api_key() {
        let env = Env::from_pairs(&[("OPENAI_API_KEY", "sk-test")]);
        let entry = meta(&OpenAiEmbedder::new(), "Embedder", &env);
        assert!(entry.available);
    }
}
