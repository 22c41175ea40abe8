//! Retry policy and strategy for transfers.
//!
//! [`RetryPolicy`] describes how many attempts a transfer gets and how long
//! to wait between them. [`RetryStrategy`] pairs a policy with the predicate
//! that decides which errors are worth another attempt. One strategy object
//! is built per operation and injected into single-file and chunk transfers.

use std::time::Duration;

use super::error::TransferError;

/// Default initial delay for exponential backoff (1 second).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Attempts granted to a whole-file transfer.
pub const DEFAULT_FILE_ATTEMPTS: u32 = 15;

/// Attempts granted to a single chunk of a multi-part file.
pub const DEFAULT_PART_ATTEMPTS: u32 = 30;

/// How a transfer handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap (delay won't exceed this).
        max_delay: Duration,
        /// Multiplier applied to delay after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_FILE_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at [`DEFAULT_INITIAL_DELAY_MS`].
    pub fn exponential(max_attempts: u32) -> Self {
        Self::backoff(
            max_attempts,
            Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        )
    }

    /// Exponential backoff with a custom initial delay.
    pub fn backoff(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// Returns `None` once `attempt` reaches the maximum, so a policy with
    /// `max_attempts = N` allows exactly N attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(capped as u64))
            }
        }
    }

    /// Maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// A retry policy plus the predicate that classifies errors.
#[derive(Clone, Debug)]
pub struct RetryStrategy {
    policy: RetryPolicy,
    retryable: fn(&TransferError) -> bool,
}

impl RetryStrategy {
    /// Strategy using [`TransferError::is_retryable`] as the predicate.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retryable: TransferError::is_retryable,
        }
    }

    /// Replace the retryable predicate.
    pub fn with_predicate(mut self, retryable: fn(&TransferError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Default strategy for whole files.
    pub fn whole_file() -> Self {
        Self::new(RetryPolicy::exponential(DEFAULT_FILE_ATTEMPTS))
    }

    /// Default strategy for chunks of multi-part files.
    pub fn part() -> Self {
        Self::new(RetryPolicy::exponential(DEFAULT_PART_ATTEMPTS))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    /// Delay after failed attempt `attempt`, ignoring the error kind.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        self.policy.delay_for_attempt(attempt)
    }

    /// Delay before the next attempt, or `None` if the transfer must give up.
    pub fn should_retry(&self, error: &TransferError, attempt: u32) -> Option<Duration> {
        if !(self.retryable)(error) {
            return None;
        }
        self.policy.delay_for_attempt(attempt)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::whole_file()
    }
}
