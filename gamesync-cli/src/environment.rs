//! Host probes that can ask the user.

use std::path::{Path, PathBuf};

use dialoguer::Confirm;
use gamesync::lifecycle::{HostEnvironment, SystemEnvironment};
use gamesync::transfer::BoxFuture;
use indicatif::MultiProgress;
use tracing::warn;

/// [`SystemEnvironment`] plus a terminal prompt before closing the game.
pub struct InteractiveEnvironment {
    system: SystemEnvironment,
    bars: MultiProgress,
    assume_yes: bool,
}

impl InteractiveEnvironment {
    pub fn new(system: SystemEnvironment, bars: MultiProgress) -> Self {
        Self {
            system,
            bars,
            assume_yes: false,
        }
    }

    /// Close a running game without asking.
    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }
}

impl HostEnvironment for InteractiveEnvironment {
    fn is_online(&self) -> BoxFuture<'_, bool> {
        self.system.is_online()
    }

    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        self.system.available_space(path)
    }

    fn is_game_running(&self) -> bool {
        self.system.is_game_running()
    }

    fn confirm_close_game(&self) -> bool {
        if self.assume_yes {
            return true;
        }
        if !console::Term::stderr().is_term() {
            return false;
        }

        // The prompt blocks; keep it off the async workers and the bars out of its way
        tokio::task::block_in_place(|| {
            self.bars.suspend(|| {
                Confirm::new()
                    .with_prompt("The game is running. Close it and continue?")
                    .default(false)
                    .interact()
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Prompt failed");
                        false
                    })
            })
        })
    }

    fn close_game(&self) -> std::io::Result<()> {
        self.system.close_game()
    }

    fn locked_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.system.locked_files(paths)
    }
}
