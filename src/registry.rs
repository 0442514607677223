//! Component registry.
//!
//! Holds the registered instances of each pluggable kind (Reader,
//! Chunker, Embedder, Retriever, Generator), produces the normalized
//! RAG-config schema clients edit, and reconciles persisted configs
//! against the current component set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::chunker::Chunker;
use crate::embedder::Embedder;
use crate::error::{Result, VerbaError};
use crate::generator::Generator;
use crate::reader::Reader;
use crate::retriever::Retriever;
use crate::schema::{verify_config, ComponentEntry, FieldSchema, KindConfig, RagConfig};
use crate::store::{self, VectorStore};

/// Behavior shared by every pluggable component kind.
pub trait Component: Send + Sync {
    /// Unique name within the component's kind.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Environment variables that must be present and non-empty for
    /// the component to be usable.
    fn required_env(&self) -> Vec<String> {
        Vec::new()
    }

    /// External services the component talks to, shown to users.
    fn required_libs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Editable config fields with their defaults.
    fn config_schema(&self) -> BTreeMap<String, FieldSchema>;
}

/// A snapshot of the process environment taken at startup.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Build the client-facing schema entry for one component.
pub fn meta<C: Component + ?Sized>(component: &C, kind: &str, env: &Env) -> ComponentEntry {
    let variables = component.required_env();
    let available = variables.iter().all(|v| env.has(v));
    ComponentEntry {
        name: component.name().to_string(),
        description: component.description().to_string(),
        component_type: kind.to_string(),
        variables,
        library: component.required_libs(),
        config: component.config_schema(),
        available,
    }
}

/// Name-keyed component instances per kind, in registration order.
pub struct Registry {
    readers: Vec<Arc<dyn Reader>>,
    chunkers: Vec<Arc<dyn Chunker>>,
    embedders: Vec<Arc<dyn Embedder>>,
    retrievers: Vec<Arc<dyn Retriever>>,
    generators: Vec<Arc<dyn Generator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
            chunkers: Vec::new(),
            embedders: Vec::new(),
            retrievers: Vec::new(),
            generators: Vec::new(),
        }
    }

    /// Registry pre-loaded with every built-in component.
    pub fn with_builtins() -> Self {
        use crate::chunker;
        use crate::embedder;
        use crate::generator;
        use crate::reader;
        use crate::retriever;

        let mut registry = Self::new();
        registry.register_reader(Arc::new(reader::text::TextReader));
        registry.register_reader(Arc::new(reader::url::UrlReader::new()));
        registry.register_reader(Arc::new(reader::github::GitHubReader::new()));

        registry.register_chunker(Arc::new(chunker::token::TokenChunker));
        registry.register_chunker(Arc::new(chunker::sentence::SentenceChunker));
        registry.register_chunker(Arc::new(chunker::recursive::RecursiveChunker));
        registry.register_chunker(Arc::new(chunker::recursive::CodeChunker));
        registry.register_chunker(Arc::new(chunker::markup::MarkdownChunker));
        registry.register_chunker(Arc::new(chunker::markup::HtmlChunker));
        registry.register_chunker(Arc::new(chunker::json::JsonChunker));
        registry.register_chunker(Arc::new(chunker::semantic::SemanticChunker));

        registry.register_embedder(Arc::new(embedder::openai::OpenAiEmbedder::new()));
        registry.register_embedder(Arc::new(embedder::ollama::OllamaEmbedder::new()));

        registry.register_retriever(Arc::new(retriever::WindowRetriever));
        registry.register_retriever(Arc::new(retriever::SimpleRetriever));

        registry.register_generator(Arc::new(generator::openai::OpenAiGenerator::new()));
        registry.register_generator(Arc::new(generator::ollama::OllamaGenerator::new()));
        registry
    }

    pub fn register_reader(&mut self, reader: Arc<dyn Reader>) {
        self.readers.push(reader);
    }

    pub fn register_chunker(&mut self, chunker: Arc<dyn Chunker>) {
        self.chunkers.push(chunker);
    }

    pub fn register_embedder(&mut self, embedder: Arc<dyn Embedder>) {
        self.embedders.push(embedder);
    }

    pub fn register_retriever(&mut self, retriever: Arc<dyn Retriever>) {
        self.retrievers.push(retriever);
    }

    pub fn register_generator(&mut self, generator: Arc<dyn Generator>) {
        self.generators.push(generator);
    }

    pub fn reader(&self, name: &str) -> Result<Arc<dyn Reader>> {
        self.readers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| VerbaError::Config(format!("unknown reader '{name}'")))
    }

    pub fn chunker(&self, name: &str) -> Result<Arc<dyn Chunker>> {
        self.chunkers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| VerbaError::Config(format!("unknown chunker '{name}'")))
    }

    pub fn embedder(&self, name: &str) -> Result<Arc<dyn Embedder>> {
        self.embedders
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| VerbaError::Config(format!("unknown embedder '{name}'")))
    }

    pub fn retriever(&self, name: &str) -> Result<Arc<dyn Retriever>> {
        self.retrievers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| VerbaError::Config(format!("unknown retriever '{name}'")))
    }

    pub fn generator(&self, name: &str) -> Result<Arc<dyn Generator>> {
        self.generators
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| VerbaError::Config(format!("unknown generator '{name}'")))
    }

    fn kind_config<C: Component + ?Sized>(
        components: &[Arc<C>],
        kind: &str,
        env: &Env,
    ) -> KindConfig {
        let entries: BTreeMap<String, ComponentEntry> = components
            .iter()
            .map(|c| (c.name().to_string(), meta(c.as_ref(), kind, env)))
            .collect();
        let selected = components
            .first()
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        KindConfig {
            selected,
            components: entries,
        }
    }

    /// A full RAG-config with, for each kind, the first registered
    /// component selected and every field at its default.
    pub fn default_config(&self, env: &Env) -> RagConfig {
        RagConfig {
            reader: Self::kind_config(&self.readers, "Reader", env),
            chunker: Self::kind_config(&self.chunkers, "Chunker", env),
            embedder: Self::kind_config(&self.embedders, "Embedder", env),
            retriever: Self::kind_config(&self.retrievers, "Retriever", env),
            generator: Self::kind_config(&self.generators, "Generator", env),
        }
    }

    /// Every embedding model reachable in the current environment:
    /// the union of `Model` dropdown choices across available
    /// embedders. Each needs its own chunk collection.
    pub fn reachable_models(&self, env: &Env) -> Vec<String> {
        let mut models = Vec::new();
        for embedder in &self.embedders {
            let entry = meta(embedder.as_ref(), "Embedder", env);
            if !entry.available {
                continue;
            }
            if let Some(field) = entry.config.get("Model") {
                for value in &field.values {
                    if !models.contains(value) {
                        models.push(value.clone());
                    }
                }
            }
        }
        models
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the persisted RAG-config and reconcile it against the current
/// component schema. A structurally matching persisted config is kept
/// (preserving user selections); a stale one is replaced by freshly
/// generated defaults which are written back.
pub async fn resolve_config(
    store: &dyn VectorStore,
    registry: &Registry,
    env: &Env,
) -> Result<RagConfig> {
    let fresh = registry.default_config(env);

    if let Some(blob) = store::get_config(store).await? {
        if let Ok(loaded) = serde_json::from_value::<RagConfig>(blob) {
            if verify_config(&loaded, &fresh) {
                return Ok(loaded);
            }
            tracing::info!("persisted RAG config is stale, regenerating defaults");
        } else {
            tracing::warn!("persisted RAG config failed to parse, regenerating defaults");
        }
    }

    store::set_config(store, &serde_json::to_value(&fresh).unwrap_or_default()).await?;
    Ok(fresh)
}
