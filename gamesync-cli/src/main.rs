//! gamesync CLI
//!
//! Installs, verifies, repairs and updates a game installation from a
//! release channel.

mod commands;
mod environment;
mod error;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use gamesync::logging::init_logging;
use tracing::{error, info};

use commands::config::ConfigCommands;
use commands::sync::InstallArgs;
use error::CliError;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Debug, Parser)]
#[command(name = "gamesync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Install, verify, repair and update a game from a release channel")]
#[command(long_about = r#"
gamesync keeps a local game installation identical to the manifest
published on a release channel.

Examples:
  gamesync config init --url https://cdn.example.com/live
  gamesync install --accept-eula --language de
  gamesync update
  gamesync repair
"#)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also log to the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer yes to every prompt
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install the game into an empty install root
    Install {
        /// Also install optional content
        #[arg(long)]
        optional: bool,

        /// Install a language pack (repeatable)
        #[arg(long = "language", value_name = "TAG")]
        languages: Vec<String>,

        /// Accept the license agreement without prompting
        #[arg(long)]
        accept_eula: bool,
    },

    /// Re-download every file that does not match the manifest
    Repair,

    /// Bring the installation to the channel's current version
    Update,

    /// Remove the installation
    Uninstall,

    /// Check the installation without changing anything
    Verify,

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Install { .. } => "install",
            Commands::Repair => "repair",
            Commands::Update => "update",
            Commands::Uninstall => "uninstall",
            Commands::Verify => "verify",
            Commands::Config(_) => "config",
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let command = match cli.command {
        Commands::Config(command) => return commands::config::run(command, cli.config.as_deref()),
        command => command,
    };

    let config = commands::common::load_config(cli.config.as_deref())?;
    let mut logging = config.logging.clone();
    logging.console |= cli.verbose;
    let _guard = init_logging(&logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = command.name(),
        "gamesync starting"
    );

    let result = match command {
        Commands::Install {
            optional,
            languages,
            accept_eula,
        } => {
            let args = InstallArgs {
                optional,
                languages,
                accept_eula,
                yes: cli.yes,
            };
            commands::sync::install(&config, args).await
        }
        Commands::Repair => commands::sync::repair(&config, cli.yes).await,
        Commands::Update => commands::sync::update(&config, cli.yes).await,
        Commands::Uninstall => commands::sync::uninstall(&config, cli.yes).await,
        Commands::Verify => commands::sync::verify(&config).await,
        Commands::Config(_) => Ok(()),
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let style = console::Style::new().red().bold();
            eprintln!("{} {}", style.apply_to("error:"), e);
            ExitCode::from(e.exit_code())
        }
    }
}
