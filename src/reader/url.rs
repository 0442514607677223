//! URL fetch reader.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, VerbaError};
use crate::models::{Document, FileConfig};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{decode_content, Reader};

/// Fetches a document over HTTP. The upload content carries the URL
/// (possibly base64-encoded like file uploads).
pub struct UrlReader {
    client: reqwest::Client,
}

impl UrlReader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for UrlReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for UrlReader {
    fn name(&self) -> &str {
        "URL"
    }

    fn description(&self) -> &str {
        "Fetches a page over HTTP and imports its body as a document"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([(
            "Convert To Markdown".to_string(),
            FieldSchema::boolean(false, "Reduce fetched HTML to text before chunking"),
        )])
    }
}

fn strip_html(body: &str) -> String {
    let re = regex::Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>")
        .expect("html strip regex");
    re.replace_all(body, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Reader for UrlReader {
    async fn load(&self, config: &ComponentEntry, file: &FileConfig) -> Result<Vec<Document>> {
        let url = decode_content(&file.content)?;
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(VerbaError::Reader(format!("'{url}' is not an http(s) URL")));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VerbaError::Reader(format!("fetching '{url}' failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerbaError::Reader(format!(
                "fetching '{url}' returned {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| VerbaError::Reader(format!("reading '{url}' failed: {e}")))?;

        let text = if config.field("Convert To Markdown")?.as_bool()? {
            strip_html(&body)
        } else {
            body
        };

        let mut docs = Document::from_text(
            &file.filename,
            text,
            "html",
            file.labels.clone(),
            url,
            &file.metadata,
        );
        for doc in &mut docs {
            doc.meta.reader = config.resolved_json();
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_drops_scripts_and_tags() {
        let html = "<html><script>var x=1;</script><body><h1>Title</h1><p>text</p></body></html>";
        assert_eq!(strip_html(html), "Title text");
    }
}
