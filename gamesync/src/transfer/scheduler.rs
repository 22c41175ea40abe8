//! Bounded-concurrency dispatch of a transfer batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::checksum::hash_file;
use crate::manifest::{ManifestEntry, PatchSource, ReleaseChannel};
use crate::patch::DeltaPatcher;

use super::bandwidth::BandwidthLimiter;
use super::http::Transport;
use super::multipart::MultiPartTransfer;
use super::progress::{
    ItemHandle, ItemStatus, ProgressEvent, ProgressReporter, ProgressSink,
    DEFAULT_REPORT_INTERVAL,
};
use super::retry::RetryStrategy;
use super::single::{DownloadContext, SingleFileTransfer, StallPolicy};
use super::stats::TransferContext;

/// Default size of the blocks a response body is written in (64KB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Tunables of one transfer batch.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Size of the permit pool.
    pub concurrency: usize,
    /// Aggregate cap in bytes per second, zero for unlimited.
    pub bandwidth_limit: u64,
    pub whole_file_retry: RetryStrategy,
    pub part_retry: RetryStrategy,
    pub stall: StallPolicy,
    pub block_size: usize,
    /// Re-hash merged multi-part files against the entry checksum.
    pub verify_merged_parts: bool,
    pub reporter_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            bandwidth_limit: 0,
            whole_file_retry: RetryStrategy::whole_file(),
            part_retry: RetryStrategy::part(),
            stall: StallPolicy::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            verify_merged_parts: true,
            reporter_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl TransferSettings {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_bandwidth_limit(mut self, bytes_per_sec: u64) -> Self {
        self.bandwidth_limit = bytes_per_sec;
        self
    }

    pub fn with_whole_file_retry(mut self, strategy: RetryStrategy) -> Self {
        self.whole_file_retry = strategy;
        self
    }

    pub fn with_part_retry(mut self, strategy: RetryStrategy) -> Self {
        self.part_retry = strategy;
        self
    }

    pub fn with_stall(mut self, stall: StallPolicy) -> Self {
        self.stall = stall;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_verify_merged_parts(mut self, verify: bool) -> Self {
        self.verify_merged_parts = verify;
        self
    }

    pub fn with_reporter_interval(mut self, interval: Duration) -> Self {
        self.reporter_interval = interval;
        self
    }
}

/// Resources shared by every transfer of one batch.
pub struct TransferShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) channel: ReleaseChannel,
    pub(crate) settings: TransferSettings,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) limiter: BandwidthLimiter,
    pub(crate) context: Arc<TransferContext>,
    pub(crate) progress: ProgressSink,
}

/// What happened to one entry of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Downloaded,
    Patched,
    Skipped,
    Failed,
}

/// Aggregate result of [`TransferScheduler::run_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: usize,
    pub patched: usize,
    pub skipped: usize,
    /// Entry paths that could not be brought to a valid state.
    pub failed: Vec<String>,
    /// Bytes that crossed the network.
    pub transferred_bytes: u64,
    /// Bytes credited for files that were already valid.
    pub credited_bytes: u64,
    /// Whether any transfer, merge or patch failed.
    pub bad_files: bool,
}

impl BatchReport {
    /// No failures at all.
    pub fn is_clean(&self) -> bool {
        !self.bad_files && self.failed.is_empty()
    }

    /// Entries that were actually fetched or patched.
    pub fn fetched(&self) -> usize {
        self.downloaded + self.patched
    }
}

/// Turns a work-list of manifest entries into concurrently running transfers.
///
/// One scheduler serves one operation. A failing entry never aborts the
/// batch; the outcome is read from the returned [`BatchReport`].
pub struct TransferScheduler {
    shared: Arc<TransferShared>,
}

impl TransferScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel: ReleaseChannel,
        settings: TransferSettings,
    ) -> Self {
        Self::with_progress(transport, channel, settings, ProgressSink::disabled())
    }

    pub fn with_progress(
        transport: Arc<dyn Transport>,
        channel: ReleaseChannel,
        settings: TransferSettings,
        progress: ProgressSink,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let limiter = BandwidthLimiter::new(settings.bandwidth_limit);

        info!(
            concurrency = settings.concurrency,
            bandwidth_limit = settings.bandwidth_limit,
            "Transfer scheduler created"
        );

        Self {
            shared: Arc::new(TransferShared {
                transport,
                channel,
                settings,
                permits,
                limiter,
                context: Arc::new(TransferContext::new()),
                progress,
            }),
        }
    }

    /// Counters and bad-files flag of the current batch.
    pub fn context(&self) -> &Arc<TransferContext> {
        &self.shared.context
    }

    /// Fetch every entry under `root` and wait for all of them.
    pub async fn run_batch(&self, root: &Path, entries: Vec<ManifestEntry>) -> BatchReport {
        let shared = &self.shared;
        let total: u64 = entries.iter().map(|e| e.transfer_size()).sum();

        shared.context.reset(total);
        shared.progress.emit(ProgressEvent::BatchStarted {
            files: entries.len(),
            total_bytes: total,
        });
        info!(files = entries.len(), total_bytes = total, "Starting transfer batch");

        let reporter = ProgressReporter::start(
            Arc::clone(&shared.context),
            shared.progress.clone(),
            shared.settings.reporter_interval,
        );

        let handles: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                let path = entry.path.clone();
                let shared = Arc::clone(shared);
                let root = root.to_path_buf();
                (path, tokio::spawn(process_entry(shared, root, entry)))
            })
            .collect();

        let mut report = BatchReport::default();
        for (path, handle) in handles {
            match handle.await {
                Ok(EntryOutcome::Downloaded) => report.downloaded += 1,
                Ok(EntryOutcome::Patched) => report.patched += 1,
                Ok(EntryOutcome::Skipped) => report.skipped += 1,
                Ok(EntryOutcome::Failed) => report.failed.push(path),
                Err(e) => {
                    error!(path = %path, error = %e, "Transfer task aborted");
                    shared.context.flag_bad_file(&path);
                    report.failed.push(path);
                }
            }
        }

        reporter.stop().await;

        report.transferred_bytes = shared.context.stats.transferred();
        report.credited_bytes = shared.context.stats.credited();
        report.bad_files = shared.context.has_bad_files();

        info!(
            downloaded = report.downloaded,
            patched = report.patched,
            skipped = report.skipped,
            failed = report.failed.len(),
            transferred_bytes = report.transferred_bytes,
            credited_bytes = report.credited_bytes,
            "Transfer batch finished"
        );

        report
    }
}

/// Digest of a local file, `None` when it is missing or unreadable.
pub(crate) async fn local_digest(path: PathBuf) -> Option<String> {
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return None;
    }
    tokio::task::spawn_blocking(move || hash_file(&path).ok())
        .await
        .ok()
        .flatten()
}

async fn process_entry(shared: Arc<TransferShared>, root: PathBuf, entry: ManifestEntry) -> EntryOutcome {
    let destination = root.join(&entry.path);

    if entry.is_multi_part() {
        let local = {
            let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
                return EntryOutcome::Failed;
            };
            local_digest(destination).await
        };
        if local.as_deref() == Some(entry.checksum.as_str()) {
            return skip(&shared, &entry);
        }
        return MultiPartTransfer::new(&shared).run(&root, &entry).await;
    }

    let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
        return EntryOutcome::Failed;
    };

    let local = local_digest(destination.clone()).await;
    if local.as_deref() == Some(entry.checksum.as_str()) {
        return skip(&shared, &entry);
    }

    if let Some(patch) = &entry.patch {
        if local.as_deref() == Some(patch.base_checksum.as_str()) {
            return apply_patch(&shared, &entry, patch, &destination).await;
        }
    }

    debug!(path = %entry.path, size = entry.size, "Downloading file");
    let item = ItemHandle::start(&entry.path, entry.size, shared.progress.clone());
    let target = DownloadContext {
        file_url: shared.channel.url_for(&entry.path),
        final_path: destination,
        label: entry.path.clone(),
    };

    match SingleFileTransfer::new(&shared, &shared.settings.whole_file_retry)
        .run(&target, &item)
        .await
    {
        Some(_) => {
            item.status(ItemStatus::Completed);
            EntryOutcome::Downloaded
        }
        None => {
            item.status(ItemStatus::Failed);
            EntryOutcome::Failed
        }
    }
}

/// Credit an already valid entry.
///
/// The credit is [`ManifestEntry::transfer_size`], the same figure the batch
/// total counts, so completed bytes reach the total exactly. For single-file
/// entries that is the declared size.
fn skip(shared: &TransferShared, entry: &ManifestEntry) -> EntryOutcome {
    debug!(path = %entry.path, size = entry.size, "Local copy already valid");
    shared.context.stats.credit(entry.transfer_size());
    shared.progress.item_status(&entry.path, ItemStatus::Skipped);
    EntryOutcome::Skipped
}

async fn apply_patch(
    shared: &TransferShared,
    entry: &ManifestEntry,
    patch: &PatchSource,
    destination: &Path,
) -> EntryOutcome {
    debug!(path = %entry.path, delta = %patch.path, "Patching file");
    let item = ItemHandle::start(&entry.path, entry.size, shared.progress.clone());

    let mut delta_path = destination.as_os_str().to_owned();
    delta_path.push(".delta");
    let delta_path = PathBuf::from(delta_path);

    let target = DownloadContext {
        file_url: shared.channel.url_for(&patch.path),
        final_path: delta_path.clone(),
        label: entry.path.clone(),
    };

    let Some(delta_bytes) = SingleFileTransfer::new(shared, &shared.settings.whole_file_retry)
        .run(&target, &item)
        .await
    else {
        item.status(ItemStatus::Failed);
        return EntryOutcome::Failed;
    };

    item.status(ItemStatus::Patching);
    let result = {
        let destination = destination.to_path_buf();
        let delta_path = delta_path.clone();
        tokio::task::spawn_blocking(move || DeltaPatcher::new().patch_file(&destination, &delta_path))
            .await
    };

    if let Err(e) = tokio::fs::remove_file(&delta_path).await {
        warn!(path = %delta_path.display(), error = %e, "Failed to delete delta file");
    }

    match result {
        Ok(Ok(())) => {
            shared
                .context
                .stats
                .credit(entry.size.saturating_sub(delta_bytes));
            item.status(ItemStatus::Completed);
            EntryOutcome::Patched
        }
        Ok(Err(e)) => {
            warn!(path = %entry.path, error = %e, "Patch failed, file will be downloaded whole next pass");
            discard(destination).await;
            shared.context.flag_bad_file(&entry.path);
            item.status(ItemStatus::Failed);
            EntryOutcome::Failed
        }
        Err(e) => {
            error!(path = %entry.path, error = %e, "Patch task panicked");
            discard(destination).await;
            shared.context.flag_bad_file(&entry.path);
            item.status(ItemStatus::Failed);
            EntryOutcome::Failed
        }
    }
}

/// Remove a file whose content can no longer be trusted as a patch base.
async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove unpatched file"),
    }
}
