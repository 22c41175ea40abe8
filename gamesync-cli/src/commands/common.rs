//! Shared setup for commands that drive the engine.

use std::path::Path;
use std::sync::Arc;

use gamesync::config::ConfigFile;
use gamesync::lifecycle::{HttpManifestSource, JsonStateStore, SystemEnvironment};
use gamesync::transfer::{progress_channel, ReqwestTransport, Transport, DEFAULT_CHANNEL_CAPACITY};
use gamesync::{EngineServices, SyncEngine};
use indicatif::MultiProgress;
use tokio::task::JoinHandle;
use tracing::info;

use crate::environment::InteractiveEnvironment;
use crate::error::CliError;
use crate::progress::ProgressRenderer;

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// An engine wired to the network, the state file and the terminal.
pub struct Session {
    pub engine: SyncEngine,
    renderer: JoinHandle<()>,
}

impl Session {
    pub fn open(config: &ConfigFile, assume_yes: bool) -> Result<Self, CliError> {
        let engine_config = config.engine_config()?;
        let channel = engine_config.channel.clone();

        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::new().map_err(|e| CliError::Runtime(e.to_string()))?);
        let manifests = Arc::new(HttpManifestSource::new(
            Arc::clone(&transport),
            channel.clone(),
        ));

        let mut system = SystemEnvironment::new();
        if let Some(host) = channel.host() {
            system = system.with_probe_host(host);
        }
        if let Some(executable) = &config.install.game_executable {
            system = system.with_executable(executable);
        }

        let bars = MultiProgress::new();
        let environment =
            InteractiveEnvironment::new(system, bars.clone()).with_assume_yes(assume_yes);

        let (sink, rx) = progress_channel(DEFAULT_CHANNEL_CAPACITY);
        let renderer = ProgressRenderer::new(bars).spawn(rx);

        info!(
            channel = %channel.name,
            install_dir = %engine_config.install_dir.display(),
            state_file = %config.state_file().display(),
            "Opening session"
        );

        let services = EngineServices {
            transport,
            manifests,
            state: Arc::new(JsonStateStore::new(config.state_file())),
            environment: Arc::new(environment),
        };

        Ok(Self {
            engine: SyncEngine::new(engine_config, services, sink),
            renderer,
        })
    }

    /// Drop the engine and wait for the last progress lines to render.
    pub async fn close(self) {
        drop(self.engine);
        let _ = self.renderer.await;
    }
}
