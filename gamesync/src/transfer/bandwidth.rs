//! Shared bandwidth budget.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket shared by every byte-stream of one operation.
///
/// The bucket holds at most one second of budget. Callers reserve tokens
/// up front and sleep for whatever they overdrew, so concurrent streams
/// queue behind each other and the aggregate rate converges on the limit.
/// Requests larger than the bucket are admitted in bucket-sized slices.
#[derive(Debug)]
pub struct BandwidthLimiter {
    rate: u64,
    bucket: Option<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl BandwidthLimiter {
    /// Create a limiter capped at `bytes_per_sec`. Zero means unlimited.
    pub fn new(bytes_per_sec: u64) -> Self {
        let bucket = (bytes_per_sec > 0).then(|| {
            Mutex::new(Bucket {
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            })
        });
        Self {
            rate: bytes_per_sec,
            bucket,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Configured rate in bytes per second, zero when unlimited.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Wait until `bytes` may be written.
    pub async fn acquire(&self, bytes: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        let capacity = self.rate;
        let mut remaining = bytes;
        while remaining > 0 {
            let slice = remaining.min(capacity);
            remaining -= slice;

            let wait = {
                let mut bucket = bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * capacity as f64).min(capacity as f64);
                bucket.last_refill = now;
                bucket.tokens -= slice as f64;

                if bucket.tokens < 0.0 {
                    Some(Duration::from_secs_f64(-bucket.tokens / capacity as f64))
                } else {
                    None
                }
            };

            if let Some(wait) = wait {
                tokio::time::sleep(wait).await;
            }
        }
    }
}
