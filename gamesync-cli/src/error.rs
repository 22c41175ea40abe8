//! CLI error type.

use std::fmt;

use gamesync::config::ConfigError;
use gamesync::lifecycle::LifecycleError;
use gamesync::SyncError;

/// Errors surfaced to the user by the `gamesync` binary.
#[derive(Debug)]
pub enum CliError {
    /// Configuration is missing or invalid.
    Config(String),
    /// The engine reported a failure.
    Sync(SyncError),
    /// The user declined a confirmation prompt.
    Aborted,
    /// The async runtime or the terminal failed.
    Runtime(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "configuration error: {}", msg),
            CliError::Sync(e) => write!(f, "{}", e),
            CliError::Aborted => write!(f, "aborted"),
            CliError::Runtime(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        CliError::Sync(e)
    }
}

impl From<LifecycleError> for CliError {
    fn from(e: LifecycleError) -> Self {
        CliError::Sync(e.into())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Aborted => 130,
            _ => 1,
        }
    }
}
