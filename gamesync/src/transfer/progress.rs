//! Progress events and their delivery.
//!
//! The engine never renders anything. It pushes [`ProgressEvent`]s into a
//! bounded channel with `try_send`; when the consumer lags, events are
//! dropped rather than blocking a transfer. Byte totals are sampled by a
//! [`ProgressReporter`] task so the hot path only touches atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::stats::{DownloadStats, TransferContext};

/// Minimum interval between two progress events for the same item.
pub const ITEM_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Default interval of the throughput reporter.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Default capacity of the progress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Which lifecycle operation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Repair,
    Update,
    Uninstall,
    Verify,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Repair => "repair",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
            Self::Verify => "verify",
        };
        write!(f, "{}", name)
    }
}

/// Phase of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Preflight,
    Working,
    PostActions,
}

/// Per-item status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// A failed attempt will be retried.
    Retrying { attempt: u32, max_attempts: u32 },
    /// The local copy already matched.
    Skipped,
    /// A delta is being applied.
    Patching,
    /// Chunk `part` of `of` is being appended to the final file.
    Merging { part: usize, of: usize },
    Completed,
    Failed,
}

/// Everything the engine reports to a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    OperationStateChanged {
        operation: OperationKind,
        state: OperationState,
    },
    BatchStarted {
        files: usize,
        total_bytes: u64,
    },
    Throughput {
        transferred: u64,
        credited: u64,
        total: u64,
        bytes_per_sec: u64,
        eta: Option<Duration>,
    },
    VerifyTick {
        completed: usize,
        total: usize,
    },
    ItemStarted {
        path: String,
        total_bytes: u64,
    },
    ItemProgress {
        path: String,
        downloaded: u64,
        total: u64,
    },
    ItemStatus {
        path: String,
        status: ItemStatus,
    },
    Removed {
        path: String,
        completed: usize,
        total: usize,
    },
    OperationFinished {
        operation: OperationKind,
        success: bool,
        message: Option<String>,
    },
}

/// Sending half of the progress channel.
///
/// Cloned freely into every transfer. A disabled sink discards everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Deliver an event without blocking.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                trace!(error = %e, "Dropped progress event");
            }
        }
    }

    pub fn item_status(&self, path: &str, status: ItemStatus) {
        self.emit(ProgressEvent::ItemStatus {
            path: path.to_string(),
            status,
        });
    }
}

/// Create a bounded progress channel.
pub fn progress_channel(capacity: usize) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSink::new(tx), rx)
}

/// Progress tracker for one logical file.
///
/// Chunks of a multi-part file share one handle, so the presentation layer
/// sees a single item whose denominator is the entry size.
#[derive(Debug)]
pub struct ItemHandle {
    path: String,
    total: u64,
    downloaded: AtomicU64,
    last_emit: Mutex<Instant>,
    sink: ProgressSink,
}

impl ItemHandle {
    /// Register an item and announce it.
    pub fn start(path: impl Into<String>, total: u64, sink: ProgressSink) -> Arc<Self> {
        let path = path.into();
        sink.emit(ProgressEvent::ItemStarted {
            path: path.clone(),
            total_bytes: total,
        });
        Arc::new(Self {
            path,
            total,
            downloaded: AtomicU64::new(0),
            last_emit: Mutex::new(Instant::now()),
            sink,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Count written bytes, emitting at most one event per
    /// [`ITEM_UPDATE_INTERVAL`].
    pub fn advance(&self, bytes: u64) {
        let downloaded = self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes;

        let due = {
            let mut last = self.last_emit.lock();
            if last.elapsed() >= ITEM_UPDATE_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };

        if due {
            self.sink.emit(ProgressEvent::ItemProgress {
                path: self.path.clone(),
                downloaded,
                total: self.total,
            });
        }
    }

    /// Take back bytes of a failed attempt.
    pub fn rewind(&self, bytes: u64) {
        let _ = self
            .downloaded
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub fn status(&self, status: ItemStatus) {
        self.sink.item_status(&self.path, status);
    }
}

/// Background task that turns [`DownloadStats`] into throughput events.
///
/// Stopped through a cancellation token once the batch is joined; dropping
/// the reporter also cancels it.
pub struct ProgressReporter {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Spawn the reporter on the current runtime.
    pub fn start<S>(stats: Arc<S>, sink: ProgressSink, interval: Duration) -> Self
    where
        S: StatsSource + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => report(stats.download_stats(), &sink),
                }
            }
            // Final report
            report(stats.download_stats(), &sink);
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the reporter and wait for its final report.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Anything that exposes the batch counters.
pub trait StatsSource {
    fn download_stats(&self) -> &DownloadStats;
}

impl StatsSource for DownloadStats {
    fn download_stats(&self) -> &DownloadStats {
        self
    }
}

impl StatsSource for TransferContext {
    fn download_stats(&self) -> &DownloadStats {
        &self.stats
    }
}

fn report(stats: &DownloadStats, sink: &ProgressSink) {
    let snap = stats.snapshot();
    sink.emit(ProgressEvent::Throughput {
        transferred: snap.transferred,
        credited: snap.credited,
        total: snap.total,
        bytes_per_sec: snap.bytes_per_sec(),
        eta: snap.eta(),
    });
}
