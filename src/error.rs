//! Error taxonomy shared by every pipeline stage.
//!
//! Stages do not catch their own errors. Each stage's public boundary
//! returns `Result<T, VerbaError>` and the ingestion pipeline is the
//! single funnel that converts a failure into one terminal
//! [`StatusReport`](crate::models::StatusReport).

use thiserror::Error;

/// Failure modes surfaced by readers, chunkers, embedders, retrievers,
/// generators, and the store adapter.
#[derive(Debug, Error)]
pub enum VerbaError {
    /// Missing or invalid user-supplied configuration, including an
    /// unavailable component being selected.
    #[error("configuration error: {0}")]
    Config(String),

    /// A reader failed to load or decode its input.
    #[error("reader failed: {0}")]
    Reader(String),

    /// A chunker could not split the document (e.g. invalid JSON fed
    /// to the JSON chunker).
    #[error("chunking failed: {0}")]
    Chunk(String),

    /// Re-ingest of an existing title with overwrite disabled.
    #[error("document '{0}' already exists and overwrite is disabled")]
    Duplicate(String),

    /// The embedder returned a different number of vectors than inputs.
    #[error("embedder returned {got} vectors for {expected} inputs")]
    EmbeddingContract { expected: usize, got: usize },

    /// Upstream embedding call failed for a non-contract reason.
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// Upstream signalled a rate limit; transient.
    #[error("rate limited by upstream provider")]
    RateLimit { retry_after: Option<u64> },

    /// Post-insert chunk count disagreed with the expected count.
    /// Triggers automatic rollback of the document and its chunks.
    #[error("chunk count mismatch after insert: expected {expected}, found {found}")]
    IngestMismatch { expected: usize, found: usize },

    /// The store adapter could not complete an operation.
    #[error("store error: {0}")]
    Store(String),

    /// The client went away. Silent: no report is emitted.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, VerbaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_one_line() {
        let errors: Vec<VerbaError> = vec![
            VerbaError::Config("bad field".into()),
            VerbaError::Duplicate("report.md".into()),
            VerbaError::EmbeddingContract {
                expected: 4,
                got: 3,
            },
            VerbaError::IngestMismatch {
                expected: 10,
                found: 7,
            },
        ];
        for e in errors {
            assert!(!e.to_string().contains('\n'));
        }
    }
}
