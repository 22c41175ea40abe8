//! Per-operation transfer accounting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Byte counters for one download batch.
///
/// Bytes that crossed the network (`transferred`) and bytes credited for
/// files that were already valid (`credited`) are tracked separately;
/// progress uses their sum.
#[derive(Debug)]
pub struct DownloadStats {
    total: AtomicU64,
    transferred: AtomicU64,
    credited: AtomicU64,
    started_at: Mutex<Instant>,
}

/// Point-in-time view of [`DownloadStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub transferred: u64,
    pub credited: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Bytes that count towards completion.
    pub fn completed(&self) -> u64 {
        self.transferred + self.credited
    }

    /// Average network throughput since the batch started.
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.transferred as f64 / secs) as u64
    }

    /// Estimated time to finish at the current rate.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.bytes_per_sec();
        if rate == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.completed());
        Some(Duration::from_secs(remaining / rate))
    }
}

impl Default for DownloadStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadStats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            credited: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Zero all counters and restart the clock.
    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.transferred.store(0, Ordering::SeqCst);
        self.credited.store(0, Ordering::SeqCst);
        *self.started_at.lock() = Instant::now();
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take back bytes of a failed attempt.
    pub fn remove_transferred(&self, bytes: u64) {
        let _ = self
            .transferred
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Count an already-valid file as done without network traffic.
    pub fn credit(&self, bytes: u64) {
        self.credited.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn credited(&self) -> u64 {
        self.credited.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            transferred: self.transferred(),
            credited: self.credited(),
            elapsed: self.started_at.lock().elapsed(),
        }
    }
}

/// Shared mutable state of one transfer batch.
///
/// Owned by the scheduler of a single operation, so two operations never
/// share counters or the bad-files flag.
#[derive(Debug, Default)]
pub struct TransferContext {
    pub stats: DownloadStats,
    bad_files: AtomicBool,
    failures: Mutex<Vec<String>>,
}

impl TransferContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new batch.
    pub fn reset(&self, total: u64) {
        self.stats.reset(total);
        self.bad_files.store(false, Ordering::SeqCst);
        self.failures.lock().clear();
    }

    /// Record a file that could not be brought to a valid state.
    pub fn flag_bad_file(&self, path: &str) {
        self.bad_files.store(true, Ordering::SeqCst);
        self.failures.lock().push(path.to_string());
    }

    pub fn has_bad_files(&self) -> bool {
        self.bad_files.load(Ordering::SeqCst)
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}
