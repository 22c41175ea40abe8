//! Configuration.
//!
//! [`ConfigFile`] is the user-editable INI file; [`EngineConfig`] is the
//! strongly-typed view the engine consumes. The CLI loads the former and
//! converts it with [`ConfigFile::engine_config`]; embedders may build an
//! `EngineConfig` directly with its `with_*` methods.

mod engine;
mod error;
mod file;

pub use engine::{
    EngineConfig, DEFAULT_REPAIR_ATTEMPTS, DEFAULT_SPACE_BUFFER_MB, DEFAULT_USER_DATA,
};
pub use error::{ConfigError, ConfigResult};
pub use file::{
    config_path, data_dir, Backoff, ChannelSection, ConfigFile, Concurrency, InstallSection,
    SyncSection, TransferSection,
};
