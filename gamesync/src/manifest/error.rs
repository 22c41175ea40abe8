//! Error types for manifest parsing.

use thiserror::Error;

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors raised while loading a manifest document.
///
/// A malformed manifest is fatal for the current operation: retrying the
/// same document cannot make it valid.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid JSON or misses a required field.
    #[error("malformed manifest: {reason}")]
    Malformed { reason: String },

    /// An entry path is absolute, empty or escapes the install root.
    #[error("unsafe path in manifest: {path:?}")]
    UnsafePath { path: String },

    /// Two entries share the same destination path.
    #[error("duplicate manifest entry: {path}")]
    DuplicatePath { path: String },

    /// A checksum is not a 64-character hex SHA-256 digest.
    #[error("invalid checksum for {path}: {checksum:?}")]
    InvalidChecksum { path: String, checksum: String },
}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = ManifestError::Malformed {
            reason: "missing field `checksum`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed manifest: missing field `checksum`"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ManifestError = serde_err.into();
        assert!(matches!(err, ManifestError::Malformed { .. }));
    }
}
