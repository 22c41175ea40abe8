//! Error types for file transfers.

use std::path::PathBuf;

use thiserror::Error;

use crate::patch::PatchError;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while fetching a file or chunk.
///
/// Most variants are transient and retried with backoff. See
/// [`TransferError::is_retryable`].
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server has no such file. Never retried.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The server answered with a non-success status other than 404.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// The request or a body read timed out.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// Connection-level failure (reset, DNS, TLS).
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Throughput fell under the configured minimum.
    #[error("transfer of {url} stalled at {bytes_per_sec} B/s")]
    Stalled { url: String, bytes_per_sec: u64 },

    /// Writing or reading a local file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Applying a delta failed. Never retried as a patch.
    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),

    /// A merged file does not hash to the manifest checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

impl TransferError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. }
                | Self::Patch(_)
                | Self::ChecksumMismatch { .. }
                | Self::Client(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
