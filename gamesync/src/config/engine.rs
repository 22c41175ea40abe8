//! Typed engine configuration.

use std::path::PathBuf;

use crate::manifest::ReleaseChannel;
use crate::transfer::TransferSettings;

/// Default number of repair passes after a failed install or update.
pub const DEFAULT_REPAIR_ATTEMPTS: u32 = 5;

/// Default free-space safety margin (512 MB).
pub const DEFAULT_SPACE_BUFFER_MB: u64 = 512;

/// Paths that belong to the player and are never verified or pruned.
pub const DEFAULT_USER_DATA: &[&str] = &["saves/**", "screenshots/**", "logs/**", "*.log"];

/// Everything the sync engine needs to run an operation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the installation; manifest paths are relative to it.
    pub install_dir: PathBuf,

    pub channel: ReleaseChannel,

    pub transfer: TransferSettings,

    /// Hard cap on repair passes.
    pub repair_attempts: u32,

    /// Extra free space required on top of the download size.
    pub space_buffer_bytes: u64,

    /// User-data globs, relative to the install root.
    pub user_data: Vec<String>,
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the paths.
    pub fn new(install_dir: impl Into<PathBuf>, channel: ReleaseChannel) -> Self {
        Self {
            install_dir: install_dir.into(),
            channel,
            transfer: TransferSettings::default(),
            repair_attempts: DEFAULT_REPAIR_ATTEMPTS,
            space_buffer_bytes: DEFAULT_SPACE_BUFFER_MB * 1024 * 1024,
            user_data: DEFAULT_USER_DATA.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_transfer(mut self, transfer: TransferSettings) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_repair_attempts(mut self, attempts: u32) -> Self {
        self.repair_attempts = attempts.max(1);
        self
    }

    pub fn with_space_buffer(mut self, bytes: u64) -> Self {
        self.space_buffer_bytes = bytes;
        self
    }

    pub fn with_user_data<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_data = globs.into_iter().map(Into::into).collect();
        self
    }
}
