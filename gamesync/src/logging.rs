//! Logging setup.
//!
//! Events always go to a daily-rolling file under the configured directory.
//! A console layer can be added for interactive runs. `RUST_LOG` overrides
//! the default filter.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};

use crate::error::{SyncError, SyncResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,gamesync=info,gamesync_cli=info";

/// Prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "gamesync.log";

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory receiving the rolling log files.
    pub directory: PathBuf,
    /// Mirror events to stderr.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: crate::config::data_dir().join("logs"),
            console: false,
        }
    }
}

/// Keeps the background log writer alive. Dropping it flushes the file.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already set. The guard must be held for the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> SyncResult<LogGuard> {
    std::fs::create_dir_all(&config.directory).map_err(|e| {
        SyncError::Logging(format!(
            "cannot create {}: {}",
            config.directory.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::daily(&config.directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let timer = OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
        OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_timer(timer.clone());

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(timer)
            .with_filter(tracing_subscriber::filter::LevelFilter::INFO)
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| SyncError::Logging(e.to_string()))?;

    Ok(LogGuard { _guard: guard })
}
