//! Error types for nearline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during index build, append, or search.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Manifest mismatch between an existing index and the caller's
    /// embedder/options. Fatal to the call, not the process.
    #[error("incompatible index: {field} mismatch (index has {expected}, caller has {actual})")]
    IncompatibleIndex {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// No index exists at the given path.
    #[error("index not found: {0}")]
    IndexNotFound(PathBuf),

    /// Every embedding request in a call failed, leaving nothing to rank.
    #[error("embedding collaborator unavailable: all {failed} requests failed")]
    EmbeddingUnavailable { failed: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Graph-structural invariant violation (e.g. a neighbor ID outside the
    /// vector store). Indicates a build bug, not a recoverable condition.
    #[error("graph invariant violated: {0}")]
    GraphInvariant(String),

    /// I/O error (file operations, disk I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checksum mismatch (blob corruption detected).
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Malformed blob contents (bad magic, unknown version, short section).
    #[error("format error: {0}")]
    Format(String),
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
