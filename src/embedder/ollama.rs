//! Ollama embeddings provider.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, VerbaError};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{parse_vectors, post_with_retry, Embedder};

const MODELS: [&str; 3] = ["nomic-embed-text", "mxbai-embed-large", "all-minilm"];

pub struct OllamaEmbedder {
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for OllamaEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for OllamaEmbedder {
    fn name(&self) -> &str {
        "OllamaEmbedder"
    }

    fn description(&self) -> &str {
        "Embeds text through a local Ollama instance"
    }

    fn required_env(&self) -> Vec<String> {
        vec!["OLLAMA_URL".to_string()]
    }

    fn required_libs(&self) -> Vec<String> {
        vec!["Ollama".to_string()]
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([(
            "Model".to_string(),
            FieldSchema::dropdown(MODELS[0], &MODELS, "Embedding model"),
        )])
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn max_batch_size(&self) -> usize {
        32
    }

    async fn vectorize(
        &self,
        config: &ComponentEntry,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let model = config.str_field("Model")?;
        let base = std::env::var("OLLAMA_URL")
            .map_err(|_| VerbaError::Config("OLLAMA_URL is not set".into()))?;
        let base = base.trim_end_matches('/');

        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });
        let url = format!("{base}/api/embed");
        let response = post_with_retry(&self.client, &url, &[], &body).await?;

        let embeddings = response
            .get("embeddings")
            .ok_or_else(|| VerbaError::Embedding("response is missing 'embeddings'".into()))?;
        parse_vectors(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{meta, Env};

    #[test]
    fn availability_follows_ollama_url() {
        let entry = meta(&OllamaEmbedder::new(), "Embedder", &Env::default());
        assert!(!entry.available);

        let env = Env::from_pairs(&[("OLLAMA_URL", "http://localhost:11434")]);
        let entry = meta(&OllamaEmbedder::new(), "Embedder", &env);
        assert!(entry.available);
        assert!(entry.config["Model"].values.contains(&"nomic-embed-text".to_string()));
    }
}
