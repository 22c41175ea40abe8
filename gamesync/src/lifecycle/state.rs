//! Persisted install state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{LifecycleError, LifecycleResult};

/// What is installed locally, and at which version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallState {
    pub installed: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub optional_installed: bool,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstallState {
    /// Stamp the state with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Storage for [`InstallState`].
pub trait InstallStateStore: Send + Sync {
    /// Load the state; a store that was never written yields the default.
    fn load(&self) -> LifecycleResult<InstallState>;

    fn save(&self, state: &InstallState) -> LifecycleResult<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_error(&self, reason: impl ToString) -> LifecycleError {
        LifecycleError::State {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl InstallStateStore for JsonStateStore {
    fn load(&self) -> LifecycleResult<InstallState> {
        match std::fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| self.state_error(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstallState::default()),
            Err(e) => Err(self.state_error(e)),
        }
    }

    fn save(&self, state: &InstallState) -> LifecycleResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.state_error(e))?;
        }
        let json = serde_json::to_vec_pretty(state).map_err(|e| self.state_error(e))?;

        // Write-then-rename; the state file is never observed half-written
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(|e| self.state_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.state_error(e))?;

        debug!(path = %self.path.display(), installed = state.installed, "Saved install state");
        Ok(())
    }
}

/// In-memory store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<InstallState>,
}

impl MemoryStateStore {
    pub fn new(state: InstallState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl InstallStateStore for MemoryStateStore {
    fn load(&self) -> LifecycleResult<InstallState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &InstallState) -> LifecycleResult<()> {
        *self.state.lock() = state.clone();
        Ok(())
    }
}
