//! Document readers.
//!
//! A [`Reader`] turns an upload descriptor into one or more
//! [`Document`]s. Readers stamp `meta.Reader` with their resolved
//! config; oversized payloads are segmented by
//! [`Document::from_text`].

pub mod github;
pub mod text;
pub mod url;

use async_trait::async_trait;
use base64::Engine;

use crate::error::{Result, VerbaError};
use crate::models::{Document, FileConfig};
use crate::registry::Component;
use crate::schema::ComponentEntry;

/// A pluggable document source.
#[async_trait]
pub trait Reader: Component {
    async fn load(&self, config: &ComponentEntry, file: &FileConfig) -> Result<Vec<Document>>;
}

/// Decode upload content that may be base64. Falls back to a
/// permissive single-byte decode when the bytes are not UTF-8, so
/// legacy text encodings degrade instead of failing the whole file.
pub(crate) fn decode_content(content: &str) -> Result<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    match engine.decode(content.trim()) {
        Ok(bytes) => Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
        }),
        Err(_) => Ok(content.to_string()),
    }
}

/// Strip a leading dot and lowercase, `"TXT"` and `".txt"` both
/// normalize to `"txt"`.
pub(crate) fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

pub(crate) fn unsupported(reader: &str, extension: &str) -> VerbaError {
    VerbaError::Reader(format!(
        "{reader} does not support the '{extension}' extension"
    ))
}
