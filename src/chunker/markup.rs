//! Heading-based chunkers for Markdown and HTML.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::{Chunk, Document};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::Chunker;

/// A section of markup text together with the heading that opened it.
struct Section {
    heading: Option<String>,
    body: String,
}

/// Split text into sections, starting a new one at each line for which
/// `heading` returns the heading text. Content before the first
/// heading becomes an unheaded leading section.
fn sections_by_heading(text: &str, heading: impl Fn(&str) -> Option<String>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        heading: None,
        body: String::new(),
    };
    for line in text.lines() {
        if let Some(title) = heading(line) {
            if current.heading.is_some() || !current.body.trim().is_empty() {
                sections.push(current);
            }
            current = Section {
                heading: Some(title),
                body: String::new(),
            };
        } else {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    if current.heading.is_some() || !current.body.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Build one chunk per non-empty section, prefixing the section body
/// with its heading so chunks stay self-describing in isolation.
/// Offsets stay unset: section extraction rewrites the text.
fn sections_to_chunks(sections: Vec<Section>, labels: &[String]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in sections {
        let body = section.body.trim();
        let content = match &section.heading {
            Some(h) if body.is_empty() => h.clone(),
            Some(h) => format!("{h}\n{body}"),
            None if body.is_empty() => continue,
            None => body.to_string(),
        };
        let id = chunks.len();
        let mut chunk = Chunk::new(id, content.clone(), content);
        chunk.labels = labels.to_vec();
        chunks.push(chunk);
    }
    chunks
}

/// Splits Markdown documents at `#`, `##` and `###` heading lines.
pub struct MarkdownChunker;

impl Component for MarkdownChunker {
    fn name(&self) -> &str {
        "Markdown"
    }

    fn description(&self) -> &str {
        "Splits Markdown at heading lines, one chunk per section"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([(
            "Max Depth".to_string(),
            FieldSchema::number(3, "Deepest heading level that starts a new chunk"),
        )])
    }
}

fn markdown_heading(line: &str, max_depth: usize) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > max_depth {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.starts_with(' ') || rest.is_empty() {
        Some(trimmed.trim_end().to_string())
    } else {
        None
    }
}

#[async_trait]
impl Chunker for MarkdownChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        let max_depth = config.int_field("Max Depth")?.clamp(1, 6) as usize;

        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let sections =
                sections_by_heading(&doc.content, |line| markdown_heading(line, max_depth));
            doc.chunks = sections_to_chunks(sections, &doc.labels);
            doc.meta.chunker = config.resolved_json();
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Splits HTML documents at `<h1>`–`<h4>` elements and strips tags
/// from the remaining text.
pub struct HtmlChunker;

impl Component for HtmlChunker {
    fn name(&self) -> &str {
        "HTML"
    }

    fn description(&self) -> &str {
        "Splits HTML at h1-h4 elements and strips markup from the text"
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::new()
    }
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<h([1-4])[^>]*>(.*?)</h[1-4]>").expect("html heading regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("html tag regex"))
}

fn strip_tags(html: &str) -> String {
    let text = tag_regex().replace_all(html, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_sections(html: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut cursor = 0usize;
    let mut pending: Option<String> = None;
    for caps in heading_regex().captures_iter(html) {
        let Some(m) = caps.get(0) else { continue };
        let body = strip_tags(&html[cursor..m.start()]);
        if pending.is_some() || !body.is_empty() {
            sections.push(Section {
                heading: pending.take(),
                body,
            });
        }
        pending = caps.get(2).map(|h| strip_tags(h.as_str()));
        cursor = m.end();
    }
    let tail = strip_tags(&html[cursor..]);
    if pending.is_some() || !tail.is_empty() {
        sections.push(Section {
            heading: pending,
            body: tail,
        });
    }
    sections
}

#[async_trait]
impl Chunker for HtmlChunker {
    async fn chunk(
        &self,
        config: &ComponentEntry,
        docs: &mut [Document],
        _embedder: Option<(&dyn Embedder, &ComponentEntry)>,
    ) -> Result<()> {
        for doc in docs.iter_mut() {
            if !doc.chunks.is_empty() {
                continue;
            }
            let sections = html_sections(&doc.content);
            doc.chunks = sections_to_chunks(sections, &doc.labels);
            doc.meta.chunker = config.resolved_json();
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
