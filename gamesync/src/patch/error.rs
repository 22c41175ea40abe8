//! Error types for delta patching.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors raised while decoding or applying a delta.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The delta file is not a valid compressed delta.
    #[error("failed to decode delta: {0}")]
    Decode(String),

    #[error("failed to encode delta: {0}")]
    Encode(String),

    /// The local file is not the content the delta was built against.
    #[error("delta base mismatch: expected {expected}, local file is {actual}")]
    BaseMismatch { expected: String, actual: String },

    /// A copy operation references a block the base does not have.
    #[error("delta references block {index} but base has {blocks} blocks")]
    InvalidBlock { index: u32, blocks: usize },

    /// The reconstructed file has the wrong length.
    #[error("patched size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The reconstructed file has the wrong digest.
    #[error("patched checksum mismatch: expected {expected}, got {actual}")]
    OutputMismatch { expected: String, actual: String },
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
