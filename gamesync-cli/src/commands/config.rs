//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use gamesync::config::{config_path, ConfigError, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration
    Show,

    /// Write a configuration file for a release channel
    Init {
        /// Base URL of the release channel
        #[arg(long)]
        url: String,

        /// Channel name (e.g. live, beta)
        #[arg(long, default_value = "live")]
        channel: String,

        /// Access key for restricted channels
        #[arg(long)]
        key: Option<String>,

        /// Install root; defaults to the per-user data directory
        #[arg(long)]
        install_dir: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand against `path`, or the default location.
pub fn run(command: ConfigCommands, path: Option<&Path>) -> Result<(), CliError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path().ok_or(ConfigError::NoConfigDir)?,
    };

    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Init {
            url,
            channel,
            key,
            install_dir,
            force,
        } => run_init(&path, url, channel, key, install_dir, force),
    }
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    if !path.exists() {
        println!("# {} does not exist; showing defaults", path.display());
    }
    print!("{}", config.to_ini_string());
    Ok(())
}

fn run_init(
    path: &Path,
    url: String,
    channel: String,
    key: Option<String>,
    install_dir: Option<PathBuf>,
    force: bool,
) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        )));
    }

    let mut config = ConfigFile::default();
    config.channel.name = channel;
    config.channel.url = url;
    config.channel.key = key;
    config.sync.install_dir = install_dir;
    // Validates the channel before anything is written
    config.release_channel()?;
    config.save_to(path)?;

    println!("Wrote {}", path.display());
    Ok(())
}
