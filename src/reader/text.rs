//! Plain-text upload reader.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, FileConfig};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{decode_content, normalize_extension, unsupported, Reader};

const EXTENSIONS: [&str; 12] = [
    "txt", "md", "markdown", "rst", "html", "htm", "json", "csv", "log", "mdx", "yaml", "yml",
];

/// Reads uploaded text files. Content may arrive base64-encoded or as
/// raw text; both are accepted.
pub struct TextReader;

impl Component for TextReader {
    fn name(&self) -> &str {
        "Text"
    }

    fn description(&self) -> &str {
        "Imports plain text, markup and data files from uploads"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::new()
    }
}

#[async_trait]
impl Reader for TextReader {
    async fn load(&self, config: &ComponentEntry, file: &FileConfig) -> Result<Vec<Document>> {
        let extension = normalize_extension(&file.extension);
        if !extension.is_empty() && !EXTENSIONS.contains(&extension.as_str()) {
            return Err(unsupported(self.name(), &extension));
        }

        let text = decode_content(&file.content)?;
        let mut docs = Document::from_text(
            &file.filename,
            text,
            &extension,
            file.labels.clone(),
            &file.source,
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
    use crate::registry::{meta, Env};
    use crate::schema::RagConfig;

    fn empty_rag_config() -> RagConfig {
        serde_json::from_value(serde_json::json!({
            "Reader": {"selected": "", "components": {}},
            "Chunker": {"selected": "", "components": {}},
            "Embedder": {"selected": "", "components": {}},
            "Retriever": {"selected": "", "components": {}},
            "Generator": {"selected": "", "components": {}},
        }))
        .unwrap()
    }

    fn file(extension: &str, content: &str) -> FileConfig {
        FileConfig {
            file_id: "f1".to_string(),
            filename: "notes.txt".to_string(),
            is_url: false,
            overwrite: false,
            extension: extension.to_string(),
            source: "upload".to_string(),
            content: content.to_string(),
            labels: vec!["docs".to_string()],
            file_size: content.len() as u64,
            rag_config: empty_rag_config(),
            metadata: String::new(),
            status: String::new(),
        }
    }

    #[tokio::test]
    async fn loads_raw_text_with_labels() {
        let config = meta(&TextReader, "Reader", &Env::default());
        let docs = TextReader
            .load(&config, &file("txt", "some file content"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "some file content");
        assert_eq!(docs[0].labels, vec!["docs"]);
        assert_eq!(docs[0].meta.reader["name"], "Text");
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let config = meta(&TextReader, "Reader", &Env::default());
        let err = TextReader
            .load(&config, &file("exe", "MZ..."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exe"));
    }
}
