//! Error types for local hashing.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for checksum operations.
pub type ChecksumResult<T> = Result<T, ChecksumError>;

/// Errors raised while hashing local files.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// A file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A directory could not be listed.
    #[error("failed to list directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A user-data exclusion is not a valid glob.
    #[error("invalid exclusion pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The hashing worker pool could not be created.
    #[error("failed to start hashing pool: {0}")]
    Pool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_display() {
        let err = ChecksumError::Read {
            path: PathBuf::from("/game/data.pak"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/game/data.pak"));
        assert!(err.to_string().contains("gone"));
    }
}
