//! Concurrent, throttled, retrying file transfer.
//!
//! A [`TransferScheduler`] turns a work-list of manifest entries into running
//! transfers:
//!
//! - a counting permit pool bounds how many bodies stream at once; chunked
//!   entries take one permit per chunk
//! - a shared [`BandwidthLimiter`] caps the aggregate rate
//! - files whose local digest already matches are skipped and credited
//! - entries with a delta whose base matches the local file are patched
//! - everything else goes through [`SingleFileTransfer`] or
//!   [`MultiPartTransfer`], each retried according to a [`RetryStrategy`]
//!
//! Failures never abort the batch. They raise the bad-files flag of the
//! per-operation [`TransferContext`] and show up in the [`BatchReport`].

mod bandwidth;
mod error;
mod http;
mod multipart;
mod progress;
mod retry;
mod scheduler;
mod single;
mod stats;

pub use bandwidth::BandwidthLimiter;
pub use error::{TransferError, TransferResult};
pub use http::{
    BodyStream, BoxFuture, FetchRequest, FetchResponse, ReqwestTransport, Transport,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use multipart::MultiPartTransfer;
pub use progress::{
    progress_channel, ItemHandle, ItemStatus, OperationKind, OperationState, ProgressEvent,
    ProgressReporter, ProgressSink, StatsSource, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_REPORT_INTERVAL,
};
pub use retry::{RetryPolicy, RetryStrategy, DEFAULT_FILE_ATTEMPTS, DEFAULT_PART_ATTEMPTS};
pub use scheduler::{
    BatchReport, EntryOutcome, TransferScheduler, TransferSettings, TransferShared,
    DEFAULT_BLOCK_SIZE, DEFAULT_CONCURRENCY,
};
pub use single::{DownloadContext, SingleFileTransfer, StallPolicy};
pub use stats::{DownloadStats, StatsSnapshot, TransferContext};
