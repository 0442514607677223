//! Core data models flowing through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::schema::RagConfig;

/// Documents larger than this are segmented into continuation parts at
/// construction so downstream vectorization batches stay bounded.
pub const MAX_DOCUMENT_CHARS: usize = 500_000;

/// Per-stage producer configs aggregated onto a document as it moves
/// through the pipeline. Each stage appends its own fully-resolved
/// config so the stored record explains how it was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "Reader", default)]
    pub reader: serde_json::Value,
    #[serde(rename = "Chunker", default)]
    pub chunker: serde_json::Value,
    #[serde(rename = "Embedder", default)]
    pub embedder: serde_json::Value,
}

/// A logical ingested file. Produced by a Reader, mutated in place by
/// the Chunker and Embedder stages, then persisted by the store. Has
/// no identity until the store assigns a UUID on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub extension: String,
    pub file_size: u64,
    pub labels: Vec<String>,
    pub source: String,
    pub metadata: String,
    pub meta: Meta,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl Document {
    /// Build one or more documents from decoded text, segmenting at
    /// [`MAX_DOCUMENT_CHARS`] on a whitespace boundary. Continuation
    /// parts are titled `"{title} (part n)"`.
    pub fn from_text(
        title: &str,
        text: String,
        extension: &str,
        labels: Vec<String>,
        source: &str,
        metadata: &str,
    ) -> Vec<Document> {
        let make = |title: String, content: String| Document {
            file_size: content.len() as u64,
            title,
            content,
            extension: extension.to_string(),
            labels: labels.clone(),
            source: source.to_string(),
            metadata: metadata.to_string(),
            meta: Meta::default(),
            chunks: Vec::new(),
        };

        if text.chars().count() <= MAX_DOCUMENT_CHARS {
            return vec![make(title.to_string(), text)];
        }

        let mut docs = Vec::new();
        let mut remaining = text.as_str();
        let mut part = 1usize;
        while !remaining.is_empty() {
            let mut cut = remaining
                .char_indices()
                .nth(MAX_DOCUMENT_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            if cut < remaining.len() {
                if let Some(ws) = remaining[..cut].rfind(char::is_whitespace) {
                    if ws > 0 {
                        cut = ws;
                    }
                }
            }
            let piece = remaining[..cut].to_string();
            let part_title = if part == 1 {
                title.to_string()
            } else {
                format!("{} (part {})", title, part)
            };
            docs.push(make(part_title, piece));
            remaining = remaining[cut..].trim_start();
            part += 1;
        }
        docs
    }
}

/// A retrievable text fragment derived from a document.
///
/// `chunk_id` is dense and strictly increasing per document, starting
/// at 0. `start_i`/`end_i` are offsets in units of the originating
/// chunker's segmenter, or `None` when the chunker rewrites text such
/// that offsets into the original are not meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub content_without_overlap: String,
    pub chunk_id: usize,
    pub start_i: Option<usize>,
    pub end_i: Option<usize>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub pca: Option<[f32; 3]>,
    /// Backpointer to the owning document, assigned at insert time.
    #[serde(default)]
    pub doc_uuid: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Chunk {
    pub fn new(chunk_id: usize, content: String, content_without_overlap: String) -> Self {
        Self {
            content,
            content_without_overlap,
            chunk_id,
            start_i: None,
            end_i: None,
            vector: None,
            pca: None,
            doc_uuid: None,
            labels: Vec::new(),
        }
    }

    pub fn with_span(mut self, start_i: usize, end_i: usize) -> Self {
        self.start_i = Some(start_i);
        self.end_i = Some(end_i);
        self
    }
}

/// The fully-assembled upload descriptor delivered by the reassembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub file_id: String,
    pub filename: String,
    #[serde(default)]
    pub is_url: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub source: String,
    /// Base64 text for binary formats, raw text otherwise.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub file_size: u64,
    pub rag_config: RagConfig,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub status: String,
}

/// Ingestion lifecycle stage carried by a [`StatusReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Ready,
    CreateNew,
    Starting,
    Loading,
    Chunking,
    Embedding,
    Ingesting,
    Done,
    Error,
}

/// A lifecycle event for one ingestion task. Reports for a single
/// `file_id` are delivered in issue order; `Error` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub file_id: String,
    pub status: FileStatus,
    pub message: String,
    pub took: f64,
}

impl StatusReport {
    pub fn new(file_id: &str, status: FileStatus, message: impl Into<String>, took: f64) -> Self {
        Self {
            file_id: file_id.to_string(),
            status,
            message: message.into(),
            took,
        }
    }
}
