//! Cargo-style rendering of engine progress events.
//!
//! ```text
//!    Checking install preflight
//!    Fetching 1432 files, 48.21 GiB
//!  [=========>               ] 18.40 GiB/48.21 GiB 42.10 MiB/s eta 12m
//!    Retrying data/level03.pak (attempt 2/15)
//!    Finished install
//! ```

use std::time::Duration;

use console::Style;
use gamesync::transfer::{ItemStatus, OperationState, ProgressEvent};
use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Status verbs, right-aligned to 12 columns.
struct Status;

impl Status {
    const CHECKING: &'static str = "Checking";
    const FETCHING: &'static str = "Fetching";
    const VERIFYING: &'static str = "Verifying";
    const PATCHING: &'static str = "Patching";
    const RETRYING: &'static str = "Retrying";
    const REMOVING: &'static str = "Removing";
    const FAILED: &'static str = "Failed";
    const FINISHED: &'static str = "Finished";
}

fn status_line(style: &Style, status: &str, message: &str) -> String {
    format!("{:>12} {}", style.apply_to(status), message)
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Consumes [`ProgressEvent`]s and draws them on stderr.
pub struct ProgressRenderer {
    bars: MultiProgress,
    bytes: Option<ProgressBar>,
    count: Option<ProgressBar>,
    green: Style,
    yellow: Style,
    red: Style,
}

impl ProgressRenderer {
    pub fn new(bars: MultiProgress) -> Self {
        Self {
            bars,
            bytes: None,
            count: None,
            green: Style::new().green().bold(),
            yellow: Style::new().yellow().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Render events until every sender is gone.
    pub fn spawn(mut self, mut rx: mpsc::Receiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(event);
            }
            self.clear();
        })
    }

    fn println(&self, style: &Style, status: &str, message: &str) {
        let _ = self.bars.println(status_line(style, status, message));
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::OperationStateChanged { operation, state } => match state {
                OperationState::Preflight => {
                    self.println(
                        &self.green,
                        Status::CHECKING,
                        &format!("{} preflight", operation),
                    );
                }
                OperationState::Idle => self.clear(),
                OperationState::Working | OperationState::PostActions => {}
            },
            ProgressEvent::BatchStarted { files, total_bytes } => {
                self.println(
                    &self.green,
                    Status::FETCHING,
                    &format!("{} files, {}", files, HumanBytes(total_bytes)),
                );
                let bar = self.bars.add(ProgressBar::new(total_bytes));
                bar.set_style(bar_style(
                    "{spinner:.green} [{bar:25.cyan/dim}] {bytes}/{total_bytes} {msg}",
                ));
                bar.enable_steady_tick(Duration::from_millis(100));
                if let Some(old) = self.bytes.replace(bar) {
                    old.finish_and_clear();
                }
            }
            ProgressEvent::Throughput {
                transferred,
                credited,
                total,
                bytes_per_sec,
                eta,
            } => {
                if let Some(bar) = &self.bytes {
                    bar.set_length(total);
                    bar.set_position((transferred + credited).min(total));
                    let eta = eta
                        .map(|d| format!(" eta {}", HumanDuration(d)))
                        .unwrap_or_default();
                    bar.set_message(format!("{}/s{}", HumanBytes(bytes_per_sec), eta));
                }
            }
            ProgressEvent::VerifyTick { completed, total } => {
                let bar = self.count_bar(Status::VERIFYING, total);
                bar.set_position(completed as u64);
            }
            ProgressEvent::Removed {
                path,
                completed,
                total,
            } => {
                let bar = self.count_bar(Status::REMOVING, total);
                bar.set_position(completed as u64);
                bar.set_prefix(path);
            }
            ProgressEvent::ItemStatus { path, status } => self.item_status(&path, status),
            ProgressEvent::ItemStarted { .. } | ProgressEvent::ItemProgress { .. } => {}
            ProgressEvent::OperationFinished {
                operation,
                success,
                message,
            } => {
                self.clear();
                let detail = message.map(|m| format!(": {}", m)).unwrap_or_default();
                if success {
                    self.println(
                        &self.green,
                        Status::FINISHED,
                        &format!("{}{}", operation, detail),
                    );
                } else {
                    self.println(&self.red, Status::FAILED, &format!("{}{}", operation, detail));
                }
            }
        }
    }

    fn item_status(&self, path: &str, status: ItemStatus) {
        match status {
            ItemStatus::Retrying {
                attempt,
                max_attempts,
            } => self.println(
                &self.yellow,
                Status::RETRYING,
                &format!("{} (attempt {}/{})", path, attempt, max_attempts),
            ),
            ItemStatus::Patching => self.println(&self.green, Status::PATCHING, path),
            ItemStatus::Failed => self.println(&self.red, Status::FAILED, path),
            ItemStatus::Skipped | ItemStatus::Merging { .. } | ItemStatus::Completed => {}
        }
    }

    /// Counting bar labelled `verb`, created on first use.
    fn count_bar(&mut self, verb: &'static str, total: usize) -> &ProgressBar {
        let bars = &self.bars;
        let bar = self.count.get_or_insert_with(|| {
            let bar = bars.add(ProgressBar::new(total as u64));
            bar.set_style(bar_style(
                "{msg:>12.green.bold} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}",
            ));
            bar
        });
        bar.set_message(verb);
        bar.set_length(total as u64);
        bar
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bytes.take() {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.count.take() {
            bar.finish_and_clear();
        }
    }
}
