//! Error types for lifecycle operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::manifest::ManifestError;
use crate::transfer::TransferError;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Reasons an install, repair, update, uninstall or verify can fail.
///
/// Individual file failures are not errors; they feed the repair loop and
/// only surface as [`LifecycleError::RepairFailed`] once it gives up.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another operation is already running.
    #[error("another operation is already in progress")]
    Busy,

    #[error("the release channel is not reachable")]
    Offline,

    #[error("the game is already installed")]
    AlreadyInstalled,

    #[error("the game is not installed")]
    NotInstalled,

    #[error(
        "not enough disk space: {} required, {} available",
        format_size(*.required),
        format_size(*.available)
    )]
    InsufficientSpace { required: u64, available: u64 },

    #[error("the license agreement has not been accepted")]
    EulaNotAccepted,

    #[error("the game is running and was not closed")]
    GameRunning,

    #[error("{} file(s) are locked by another process", .paths.len())]
    LockedFiles { paths: Vec<PathBuf> },

    /// Files still failed verification after every repair attempt.
    #[error("{} file(s) still invalid after {attempts} repair attempt(s)", .failed.len())]
    RepairFailed { attempts: u32, failed: Vec<String> },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The manifest could not be downloaded.
    #[error("failed to fetch manifest: {0}")]
    ManifestFetch(#[from] TransferError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// The persisted install state could not be read or written.
    #[error("install state error at {path}: {reason}")]
    State { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Anything that escaped the operation itself, e.g. a panicked task.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl LifecycleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_insufficient_space_message() {
        let err = LifecycleError::InsufficientSpace {
            required: 2 * 1024 * 1024,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "not enough disk space: 2.0 MB required, 1.0 KB available"
        );
    }
}
