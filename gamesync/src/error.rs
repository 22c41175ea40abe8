//! Crate-level error type.

use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;
use crate::manifest::ManifestError;
use crate::patch::PatchError;
use crate::transfer::TransferError;

/// Result type spanning every module.
pub type SyncResult<T> = Result<T, SyncError>;

/// Any error the library can return.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}
