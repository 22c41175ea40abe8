//! Streaming one URL into one file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::{TransferError, TransferResult};
use super::http::FetchRequest;
use super::progress::{ItemHandle, ItemStatus};
use super::retry::RetryStrategy;
use super::scheduler::TransferShared;

/// Lower bound of the throughput check interval.
pub const MIN_STALL_CHECK: Duration = Duration::from_secs(5);

/// Upper bound of the throughput check interval.
pub const MAX_STALL_CHECK: Duration = Duration::from_secs(15);

/// When a transfer counts as stalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallPolicy {
    /// How often average throughput is measured.
    pub check_interval: Duration,
    /// Minimum acceptable average throughput over one interval.
    pub min_bytes_per_sec: u64,
    /// Abort when no data at all arrives for this long, including the wait
    /// for response headers.
    pub zero_timeout: Duration,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            min_bytes_per_sec: 1024,
            zero_timeout: Duration::from_secs(5),
        }
    }
}

impl StallPolicy {
    /// Policy with the check interval clamped to 5-15 seconds.
    pub fn clamped(check_interval: Duration, min_bytes_per_sec: u64, zero_timeout: Duration) -> Self {
        Self {
            check_interval: check_interval.clamp(MIN_STALL_CHECK, MAX_STALL_CHECK),
            min_bytes_per_sec,
            zero_timeout,
        }
    }
}

/// Runtime-only state of one in-flight file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadContext {
    pub file_url: String,
    pub final_path: PathBuf,
    /// Manifest path used in logs and failure lists.
    pub label: String,
}

/// Path the body is streamed to before it replaces `final_path`.
fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// A single GET streamed to disk with retries.
///
/// The body goes to `<final_path>.tmp` and is renamed into place once
/// complete, so `final_path` never holds a truncated download. The caller
/// holds the transfer permit. On exhausted retries the bad-files flag is
/// raised and the temporary file removed; siblings are unaffected.
pub struct SingleFileTransfer<'a> {
    shared: &'a TransferShared,
    retry: &'a RetryStrategy,
}

impl<'a> SingleFileTransfer<'a> {
    pub fn new(shared: &'a TransferShared, retry: &'a RetryStrategy) -> Self {
        Self { shared, retry }
    }

    /// Download `target`, returning the number of bytes written.
    ///
    /// `None` means the transfer failed for good.
    pub async fn run(&self, target: &DownloadContext, item: &ItemHandle) -> Option<u64> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut counted = 0u64;

            match self.attempt(target, item, &mut counted).await {
                Ok(bytes) => {
                    debug!(path = %target.label, bytes, attempt, "Transfer complete");
                    return Some(bytes);
                }
                Err(e) => {
                    self.shared.context.stats.remove_transferred(counted);
                    item.rewind(counted);

                    match self.retry.should_retry(&e, attempt) {
                        Some(delay) => {
                            warn!(
                                path = %target.label,
                                attempt,
                                max_attempts,
                                error = %e,
                                "Transfer failed, retrying"
                            );
                            item.status(ItemStatus::Retrying {
                                attempt,
                                max_attempts,
                            });
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            warn!(
                                path = %target.label,
                                attempts = attempt,
                                error = %e,
                                "Transfer failed"
                            );
                            self.shared.context.flag_bad_file(&target.label);
                            let partial = temp_path(&target.final_path);
                            if let Err(e) = tokio::fs::remove_file(&partial).await {
                                if e.kind() != std::io::ErrorKind::NotFound {
                                    warn!(
                                        path = %partial.display(),
                                        error = %e,
                                        "Failed to remove partial file"
                                    );
                                }
                            }
                            return None;
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &DownloadContext,
        item: &ItemHandle,
        counted: &mut u64,
    ) -> TransferResult<u64> {
        let shared = self.shared;
        let settings = &shared.settings;
        let stall = &settings.stall;

        let request = FetchRequest::new(&target.file_url)
            .with_channel_key(shared.channel.channel_key.clone());
        let mut response = tokio::time::timeout(stall.zero_timeout, shared.transport.fetch(request))
            .await
            .map_err(|_| TransferError::Timeout {
                url: target.file_url.clone(),
            })??;

        if let Some(parent) = target.final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }
        let partial = temp_path(&target.final_path);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| TransferError::io(&partial, e))?;

        let block_size = settings.block_size.max(1);
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;
        // Time spent waiting on the bandwidth limiter is not a stall
        let mut throttled = Duration::ZERO;

        loop {
            let next = tokio::time::timeout(stall.zero_timeout, response.body.next())
                .await
                .map_err(|_| TransferError::Stalled {
                    url: target.file_url.clone(),
                    bytes_per_sec: 0,
                })?;

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            for block in chunk.chunks(block_size) {
                let len = block.len() as u64;
                if !shared.limiter.is_unlimited() {
                    let waited = Instant::now();
                    shared.limiter.acquire(len).await;
                    throttled += waited.elapsed();
                }
                file.write_all(block)
                    .await
                    .map_err(|e| TransferError::io(&partial, e))?;

                *counted += len;
                window_bytes += len;
                shared.context.stats.add_transferred(len);
                item.advance(len);
            }

            let elapsed = window_start.elapsed().saturating_sub(throttled);
            if elapsed >= stall.check_interval {
                let rate = (window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                if rate < stall.min_bytes_per_sec {
                    return Err(TransferError::Stalled {
                        url: target.file_url.clone(),
                        bytes_per_sec: rate,
                    });
                }
                window_start = Instant::now();
                window_bytes = 0;
                throttled = Duration::ZERO;
            }
        }

        file.flush()
            .await
            .map_err(|e| TransferError::io(&partial, e))?;
        drop(file);

        tokio::fs::rename(&partial, &target.final_path)
            .await
            .map_err(|e| TransferError::io(&target.final_path, e))?;

        Ok(*counted)
    }
}
