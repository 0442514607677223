//! Chunked upload reassembly.
//!
//! Large upload descriptors arrive as ordered fragments over the
//! socket. The [`Reassembler`] buffers them per `file_id` and releases
//! a parsed [`FileConfig`] once every fragment is present. At most one
//! upload per `file_id` is in flight; a completed or aborted upload
//! frees its buffer.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::{Result, VerbaError};
use crate::models::FileConfig;

/// One fragment of a chunked upload.
#[derive(Debug, Clone, Deserialize)]
pub struct Fragment {
    pub file_id: String,
    /// Zero-based position of this fragment.
    pub order: usize,
    /// Total number of fragments in the upload.
    pub total: usize,
    /// Set by the client on the last fragment it sends; used to
    /// detect truncated uploads.
    #[serde(default)]
    pub is_last_chunk: bool,
    /// Fragment payload.
    pub chunk: String,
}

/// Outcome of feeding one fragment to the reassembler.
#[derive(Debug)]
pub enum Reassembly {
    /// More fragments are needed.
    Pending,
    /// Every fragment arrived; the descriptor parsed cleanly.
    Complete(Box<FileConfig>),
    /// The client sent its last fragment but the sequence has holes.
    /// The buffer has been dropped.
    Incomplete,
}

#[derive(Default)]
struct FileBuffer {
    total: usize,
    fragments: BTreeMap<usize, String>,
}

/// Per-connection fragment buffers, keyed by `file_id`.
#[derive(Default)]
pub struct Reassembler {
    buffers: HashMap<String, FileBuffer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Fragments may arrive in any order;
    /// duplicates overwrite.
    pub fn push(&mut self, fragment: Fragment) -> Result<Reassembly> {
        let buffer = self.buffers.entry(fragment.file_id.clone()).or_default();
        buffer.total = fragment.total;
        buffer.fragments.insert(fragment.order, fragment.chunk);

        if buffer.fragments.len() >= buffer.total {
            let buffer = self
                .buffers
                .remove(&fragment.file_id)
                .unwrap_or_default();
            let payload: String = buffer.fragments.into_values().collect();
            let config: FileConfig = serde_json::from_str(&payload).map_err(|e| {
                VerbaError::Config(format!(
                    "upload '{}' did not parse as a file config: {e}",
                    fragment.file_id
                ))
            })?;
            return Ok(Reassembly::Complete(Box::new(config)));
        }

        if fragment.is_last_chunk {
            self.buffers.remove(&fragment.file_id);
            return Ok(Reassembly::Incomplete);
        }
        Ok(Reassembly::Pending)
    }

    /// Drop any buffered fragments for `file_id`.
    pub fn abort(&mut self, file_id: &str) {
        self.buffers.remove(file_id);
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_json() -> String {
        serde_json::json!({
            "file_id": "f1",
            "filename": "notes.txt",
            "extension": "txt",
            "source": "upload",
            "content": "aGVsbG8=",
            "labels": ["a"],
            "rag_config": {
                "Reader": {"selected": "", "components": {}},
                "Chunker": {"selected": "", "components": {}},
                "Embedder": {"selected": "", "components": {}},
                "Retriever": {"selected": "", "components": {}},
                "Generator": {"selected": "", "components": {}},
            },
        })
        .to_string()
    }

    fn fragments(payload: &str, parts: usize) -> Vec<Fragment> {
        let chars: Vec<char> = payload.chars().collect();
        let size = chars.len().div_ceil(parts);
        chars
            .chunks(size)
            .enumerate()
            .map(|(i, c)| Fragment {
                file_id: "f1".to_string(),
                order: i,
                total: parts,
                is_last_chunk: i == parts - 1,
                chunk: c.iter().collect(),
            })
            .collect()
    }

    #[test]
    fn in_order_delivery_completes() {
        let mut reassembler = Reassembler::new();
        let frags = fragments(&descriptor_json(), 3);
        assert!(matches!(
            reassembler.push(frags[0].clone()).unwrap(),
            Reassembly::Pending
        ));
        assert!(matches!(
            reassembler.push(frags[1].clone()).unwrap(),
            Reassembly::Pending
        ));
        let Reassembly::Complete(config) = reassembler.push(frags[2].clone()).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(config.filename, "notes.txt");
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn any_permutation_completes_identically() {
        let payload = descriptor_json();
        let base = fragments(&payload, 4);
        let orders: [[usize; 4]; 5] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [0, 2, 1, 3],
        ];
        for order in orders {
            let mut reassembler = Reassembler::new();
            let mut completed = None;
            for (arrival, &i) in order.iter().enumerate() {
                // the client marks whichever fragment it sends last
                let mut fragment = base[i].clone();
                fragment.is_last_chunk = arrival == order.len() - 1;
                if let Reassembly::Complete(c) = reassembler.push(fragment).unwrap() {
                    completed = Some(c);
                }
            }
            let config = completed.expect("all fragments delivered");
            assert_eq!(config.file_id, "f1");
            assert_eq!(config.content, "aGVsbG8=");
        }
    }

    #[test]
    fn early_last_marker_drops_the_buffer() {
        let mut reassembler = Reassembler::new();
        let frags = fragments(&descriptor_json(), 4);
        let mut first = frags[3].clone();
        first.is_last_chunk = true;
        let outcome = reassembler.push(first).unwrap();
        assert!(matches!(outcome, Reassembly::Incomplete));
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn fragment_wire_fields_are_snake_case() {
        let fragment: Fragment = serde_json::from_str(
            r#"{"file_id": "f1", "order": 0, "total": 2, "is_last_chunk": false, "chunk": "{"}"#,
        )
        .unwrap();
        assert_eq!(fragment.file_id, "f1");
        assert_eq!(fragment.total, 2);
    }

    #[test]
    fn truncated_upload_is_dropped() {
        let mut reassembler = Reassembler::new();
        let frags = fragments(&descriptor_json(), 3);
        // fragment 1 never arrives
        reassembler.push(frags[0].clone()).unwrap();
        let outcome = reassembler.push(frags[2].clone()).unwrap();
        assert!(matches!(outcome, Reassembly::Incomplete));
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn unparseable_payload_is_an_error() {
        let mut reassembler = Reassembler::new();
        let outcome = reassembler.push(Fragment {
            file_id: "f1".to_string(),
            order: 0,
            total: 1,
            is_last_chunk: true,
            chunk: "{broken".to_string(),
        });
        assert!(matches!(outcome, Err(VerbaError::Config(_))));
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn interleaved_files_do_not_mix() {
        let mut reassembler = Reassembler::new();
        let mut frags = fragments(&descriptor_json(), 2);
        let mut other = frags.clone();
        for f in &mut other {
            f.file_id = "f2".to_string();
            f.chunk = f.chunk.replace("notes.txt", "other.txt");
        }
        reassembler.push(frags[0].clone()).unwrap();
        reassembler.push(other[0].clone()).unwrap();
        let Reassembly::Complete(first) = reassembler.push(frags.remove(1)).unwrap() else {
            panic!("expected completion");
        };
        let Reassembly::Complete(second) = reassembler.push(other.remove(1)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(first.filename, "notes.txt");
        assert_eq!(second.filename, "other.txt");
    }
}
