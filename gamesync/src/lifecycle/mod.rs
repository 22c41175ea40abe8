//! Lifecycle orchestration.
//!
//! [`SyncEngine`] sequences the manifest, checksum and transfer modules into
//! the user-facing operations. Its collaborators sit behind traits so the
//! engine can be driven without a network or a real host:
//!
//! - [`ManifestSource`] supplies a fresh manifest per operation
//! - [`InstallStateStore`] persists what is installed
//! - [`HostEnvironment`] answers preflight questions (online, disk space,
//!   running game, locked files)

mod engine;
mod environment;
mod error;
mod source;
mod state;

pub use engine::{
    EngineServices, InstallReport, InstallRequest, RepairReport, SyncEngine, TransferTotals,
    UninstallReport, UpdateReport, VerifyReport,
};
pub use environment::{HostEnvironment, SystemEnvironment};
pub use error::{format_size, LifecycleError, LifecycleResult};
pub use source::{HttpManifestSource, ManifestSource};
pub use state::{InstallState, InstallStateStore, JsonStateStore, MemoryStateStore};
