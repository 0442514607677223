//! GitHub repository reader.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Result, VerbaError};
use crate::models::{Document, FileConfig};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::Reader;

const TEXT_EXTENSIONS: [&str; 14] = [
    "md", "markdown", "mdx", "rst", "txt", "py", "rs", "js", "ts", "go", "toml", "yaml", "yml",
    "json",
];

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
}

/// Imports text files from a GitHub repository through the REST API.
pub struct GitHubReader {
    client: reqwest::Client,
}

impl GitHubReader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent("verba")
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, token: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| VerbaError::Reader(format!("GitHub request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerbaError::Reader(format!("GitHub returned {status} for {url}")));
        }
        response
            .json()
            .await
            .map_err(|e| VerbaError::Reader(format!("invalid GitHub response: {e}")))
    }
}

impl Default for GitHubReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for GitHubReader {
    fn name(&self) -> &str {
        "GitHub"
    }

    fn description(&self) -> &str {
        "Imports text files from a GitHub repository"
    }

    fn required_env(&self) -> Vec<String> {
        vec!["GITHUB_TOKEN".to_string()]
    }

    fn required_libs(&self) -> Vec<String> {
        vec!["GitHub".to_string()]
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Owner".to_string(),
                FieldSchema::text("", "Repository owner or organization"),
            ),
            ("Repo".to_string(), FieldSchema::text("", "Repository name")),
            (
                "Branch".to_string(),
                FieldSchema::text("main", "Branch to read"),
            ),
            (
                "Path".to_string(),
                FieldSchema::text("", "Restrict the import to this path prefix"),
            ),
        ])
    }
}

#[async_trait]
impl Reader for GitHubReader {
    async fn load(&self, config: &ComponentEntry, file: &FileConfig) -> Result<Vec<Document>> {
        let owner = config.str_field("Owner")?;
        let repo = config.str_field("Repo")?;
        let branch = config.str_field("Branch")?;
        let prefix = config.str_field("Path")?;
        if owner.is_empty() || repo.is_empty() {
            return Err(VerbaError::Config(
                "the GitHub reader needs Owner and Repo set".into(),
            ));
        }
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| VerbaError::Config("GITHUB_TOKEN is not set".into()))?;

        let tree_url = format!(
            "https://api.github.com/repos/{owner}/{repo}/git/trees/{branch}?recursive=1"
        );
        let tree: TreeResponse = self.get_json(&tree_url, &token).await?;

        let engine = base64::engine::general_purpose::STANDARD;
        let mut docs = Vec::new();
        for entry in tree.tree {
            if entry.entry_type != "blob" || !entry.path.starts_with(prefix) {
                continue;
            }
            let extension = entry
                .path
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
                continue;
            }

            let content_url = format!(
                "https://api.github.com/repos/{owner}/{repo}/contents/{}?ref={branch}",
                entry.path
            );
            let blob: ContentResponse = self.get_json(&content_url, &token).await?;
            let raw: String = blob.content.split_whitespace().collect();
            let bytes = engine
                .decode(&raw)
                .map_err(|e| VerbaError::Reader(format!("'{}' is not base64: {e}", entry.path)))?;
            let Ok(text) = String::from_utf8(bytes) else {
                tracing::debug!(path = entry.path, "skipping non-UTF-8 blob");
                continue;
            };

            let source = format!("https://github.com/{owner}/{repo}/blob/{branch}/{}", entry.path);
            let mut parts = Document::from_text(
                &entry.path,
                text,
                &extension,
                file.labels.clone(),
                &source,
                &file.metadata,
            );
            for doc in &mut parts {
                doc.meta.reader = config.resolved_json();
            }
            docs.extend(parts);
        }

        if docs.is_empty() {
            return Err(VerbaError::Reader(format!(
                "no importable text files under '{prefix}' in {owner}/{repo}@{branch}"
            )));
        }
        Ok(docs)
    }
}
