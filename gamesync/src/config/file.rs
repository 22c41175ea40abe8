//! INI configuration file.
//!
//! ```ini
//! [channel]
//! name = live
//! url = https://cdn.example.com/live
//! key =
//!
//! [sync]
//! install_dir = /home/player/Games/Example
//! concurrency = max
//! bandwidth_limit = 0
//!
//! [transfer]
//! max_attempts = 15
//! backoff = exponential
//!
//! [install]
//! user_data = saves/**,screenshots/**,logs/**,*.log
//!
//! [logging]
//! console = false
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::logging::LoggingConfig;
use crate::manifest::ReleaseChannel;
use crate::transfer::{RetryPolicy, RetryStrategy, StallPolicy, TransferSettings, DEFAULT_BLOCK_SIZE};

use super::engine::{EngineConfig, DEFAULT_REPAIR_ATTEMPTS, DEFAULT_SPACE_BUFFER_MB, DEFAULT_USER_DATA};
use super::error::{ConfigError, ConfigResult};

const APP_DIR: &str = "gamesync";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Default location of the configuration file.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE_NAME))
}

/// Default directory for installs, state and logs.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Size of the transfer permit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Derived from the number of CPUs.
    #[default]
    Max,
    Fixed(usize),
}

impl Concurrency {
    /// Resolve to a concrete worker count.
    ///
    /// `Max` is twice the available parallelism, clamped to 4..=32.
    pub fn resolve(&self) -> usize {
        match self {
            Self::Max => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                (cpus * 2).clamp(4, 32)
            }
            Self::Fixed(n) => (*n).max(1),
        }
    }
}

impl FromStr for Concurrency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("max") {
            return Ok(Self::Max);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Self::Fixed(n)),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Concurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Max => write!(f, "max"),
            Self::Fixed(n) => write!(f, "{}", n),
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

impl FromStr for Backoff {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

/// `[channel]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSection {
    pub name: String,
    pub url: String,
    pub key: Option<String>,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            name: "live".to_string(),
            url: String::new(),
            key: None,
        }
    }
}

/// `[sync]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub install_dir: Option<PathBuf>,
    pub concurrency: Concurrency,
    pub bandwidth_limit: u64,
    pub state_file: Option<PathBuf>,
}

/// `[transfer]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSection {
    pub max_attempts: u32,
    pub part_max_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    pub stall_check_secs: u64,
    pub stall_min_bytes_per_sec: u64,
    pub stall_zero_secs: u64,
    pub block_size: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            part_max_attempts: 30,
            retry_delay_ms: 1000,
            backoff: Backoff::Exponential,
            stall_check_secs: 10,
            stall_min_bytes_per_sec: 1024,
            stall_zero_secs: 5,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl TransferSection {
    fn strategy(&self, max_attempts: u32) -> RetryStrategy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        let policy = match self.backoff {
            Backoff::Fixed => RetryPolicy::fixed(max_attempts, delay),
            Backoff::Exponential => RetryPolicy::backoff(max_attempts, delay),
        };
        RetryStrategy::new(policy)
    }
}

/// `[install]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSection {
    pub repair_attempts: u32,
    pub space_buffer_mb: u64,
    pub user_data: Vec<String>,
    pub verify_merged_parts: bool,
    /// Process name checked before repairs.
    pub game_executable: Option<String>,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            repair_attempts: DEFAULT_REPAIR_ATTEMPTS,
            space_buffer_mb: DEFAULT_SPACE_BUFFER_MB,
            user_data: DEFAULT_USER_DATA.iter().map(|s| s.to_string()).collect(),
            verify_merged_parts: true,
            game_executable: None,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub channel: ChannelSection,
    pub sync: SyncSection,
    pub transfer: TransferSection,
    pub install: InstallSection,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> ConfigResult<Self> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn from_str_ini(text: &str) -> ConfigResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let defaults = Self::default();
        let channel = Section::new(ini, "channel");
        let sync = Section::new(ini, "sync");
        let transfer = Section::new(ini, "transfer");
        let install = Section::new(ini, "install");
        let logging = Section::new(ini, "logging");

        Ok(Self {
            channel: ChannelSection {
                name: channel.string("name").unwrap_or(defaults.channel.name),
                url: channel.string("url").unwrap_or_default(),
                key: channel.string("key"),
            },
            sync: SyncSection {
                install_dir: sync.string("install_dir").map(PathBuf::from),
                concurrency: sync.parse("concurrency", defaults.sync.concurrency)?,
                bandwidth_limit: sync.parse("bandwidth_limit", 0)?,
                state_file: sync.string("state_file").map(PathBuf::from),
            },
            transfer: TransferSection {
                max_attempts: transfer.parse("max_attempts", defaults.transfer.max_attempts)?,
                part_max_attempts: transfer
                    .parse("part_max_attempts", defaults.transfer.part_max_attempts)?,
                retry_delay_ms: transfer.parse("retry_delay_ms", defaults.transfer.retry_delay_ms)?,
                backoff: transfer.parse("backoff", defaults.transfer.backoff)?,
                stall_check_secs: transfer
                    .parse("stall_check_secs", defaults.transfer.stall_check_secs)?,
                stall_min_bytes_per_sec: transfer.parse(
                    "stall_min_bytes_per_sec",
                    defaults.transfer.stall_min_bytes_per_sec,
                )?,
                stall_zero_secs: transfer.parse("stall_zero_secs", defaults.transfer.stall_zero_secs)?,
                block_size: transfer.parse("block_size", defaults.transfer.block_size)?,
            },
            install: InstallSection {
                repair_attempts: install
                    .parse("repair_attempts", defaults.install.repair_attempts)?,
                space_buffer_mb: install
                    .parse("space_buffer_mb", defaults.install.space_buffer_mb)?,
                user_data: install
                    .string("user_data")
                    .map(|v| split_list(&v))
                    .unwrap_or(defaults.install.user_data),
                verify_merged_parts: install
                    .parse("verify_merged_parts", defaults.install.verify_merged_parts)?,
                game_executable: install.string("game_executable"),
            },
            logging: LoggingConfig {
                directory: logging
                    .string("directory")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.logging.directory),
                console: logging.parse("console", defaults.logging.console)?,
            },
        })
    }

    /// Write the configuration as INI.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    /// Render the configuration as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.to_ini().write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("channel"))
            .set("name", self.channel.name.as_str())
            .set("url", self.channel.url.as_str())
            .set("key", self.channel.key.clone().unwrap_or_default());
        ini.with_section(Some("sync"))
            .set("install_dir", path_string(&self.sync.install_dir))
            .set("concurrency", self.sync.concurrency.to_string())
            .set("bandwidth_limit", self.sync.bandwidth_limit.to_string())
            .set("state_file", path_string(&self.sync.state_file));
        ini.with_section(Some("transfer"))
            .set("max_attempts", self.transfer.max_attempts.to_string())
            .set("part_max_attempts", self.transfer.part_max_attempts.to_string())
            .set("retry_delay_ms", self.transfer.retry_delay_ms.to_string())
            .set("backoff", self.transfer.backoff.to_string())
            .set("stall_check_secs", self.transfer.stall_check_secs.to_string())
            .set(
                "stall_min_bytes_per_sec",
                self.transfer.stall_min_bytes_per_sec.to_string(),
            )
            .set("stall_zero_secs", self.transfer.stall_zero_secs.to_string())
            .set("block_size", self.transfer.block_size.to_string());
        ini.with_section(Some("install"))
            .set("repair_attempts", self.install.repair_attempts.to_string())
            .set("space_buffer_mb", self.install.space_buffer_mb.to_string())
            .set("user_data", self.install.user_data.join(","))
            .set("verify_merged_parts", self.install.verify_merged_parts.to_string())
            .set(
                "game_executable",
                self.install.game_executable.clone().unwrap_or_default(),
            );
        ini.with_section(Some("logging"))
            .set("directory", self.logging.directory.display().to_string())
            .set("console", self.logging.console.to_string());
        ini
    }

    /// Install root, defaulting to `<data_dir>/<channel>`.
    pub fn install_dir(&self) -> PathBuf {
        self.sync
            .install_dir
            .clone()
            .unwrap_or_else(|| data_dir().join(&self.channel.name))
    }

    /// Install state file, defaulting to `<data_dir>/<channel>.state.json`.
    pub fn state_file(&self) -> PathBuf {
        self.sync
            .state_file
            .clone()
            .unwrap_or_else(|| data_dir().join(format!("{}.state.json", self.channel.name)))
    }

    /// Release channel described by `[channel]`.
    pub fn release_channel(&self) -> ConfigResult<ReleaseChannel> {
        if self.channel.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                section: "channel".to_string(),
                key: "url".to_string(),
            });
        }
        let channel = ReleaseChannel::new(&self.channel.name, self.channel.url.trim());
        Ok(match &self.channel.key {
            Some(key) => channel.with_key(key),
            None => channel,
        })
    }

    /// Convert into the engine's typed configuration.
    pub fn engine_config(&self) -> ConfigResult<EngineConfig> {
        let t = &self.transfer;
        let transfer = TransferSettings::default()
            .with_concurrency(self.sync.concurrency.resolve())
            .with_bandwidth_limit(self.sync.bandwidth_limit)
            .with_whole_file_retry(t.strategy(t.max_attempts.max(1)))
            .with_part_retry(t.strategy(t.part_max_attempts.max(1)))
            .with_stall(StallPolicy::clamped(
                Duration::from_secs(t.stall_check_secs),
                t.stall_min_bytes_per_sec,
                Duration::from_secs(t.stall_zero_secs.max(1)),
            ))
            .with_block_size(t.block_size)
            .with_verify_merged_parts(self.install.verify_merged_parts);

        Ok(EngineConfig::new(self.install_dir(), self.release_channel()?)
            .with_transfer(transfer)
            .with_repair_attempts(self.install.repair_attempts)
            .with_space_buffer(self.install.space_buffer_mb * 1024 * 1024)
            .with_user_data(self.install.user_data.clone()))
    }
}

/// Read access to one INI section with typed parsing.
struct Section<'a> {
    name: &'static str,
    props: Option<&'a Properties>,
}

impl<'a> Section<'a> {
    fn new(ini: &'a Ini, name: &'static str) -> Self {
        Self {
            name,
            props: ini.section(Some(name)),
        }
    }

    /// Non-empty trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        self.props
            .and_then(|p| p.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                section: self.name.to_string(),
                key: key.to_string(),
                value,
            }),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn path_string(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}
