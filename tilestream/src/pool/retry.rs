//! Retry policy for transient fetch failures.
//!
//! The policy owns the whole retry decision: it consults the error's
//! [`retryability`](SourceError::is_retryable) and its own attempt budget,
//! and hands the worker either a backoff delay or nothing.

use std::time::Duration;

use crate::source::SourceError;

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (5 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 5;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a worker handles transient fetch failures.
///
/// Retries apply only to failures the source reports as retryable (network
/// errors, timeouts, server errors). Malformed payloads are never retried
/// against the same bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries, fail on the first error.
    None,

    /// Fixed number of attempts with a constant delay between them.
    Fixed {
        /// Maximum number of attempts, including the initial one.
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Exponential backoff, the recommended policy for network sources.
    ExponentialBackoff {
        /// Maximum number of attempts, including the initial one.
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Cap on the delay between attempts.
        max_delay: Duration,
        /// Multiplier applied after each failure.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl RetryPolicy {
    /// Exponential backoff with default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Fixed-delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Delay before re-fetching after `attempt` failed attempts, or `None`
    /// when the error is not worth retrying or the budget is spent.
    ///
    /// Missing tiles, client errors and broken configurations fail on the
    /// first attempt regardless of the policy.
    pub fn next_delay(&self, error: &SourceError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_attempts() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let grown = initial_delay.as_secs_f64()
                    * multiplier.powi(attempt.saturating_sub(1) as i32);
                Some(Duration::from_secs_f64(
                    grown.min(max_delay.as_secs_f64()),
                ))
            }
        }
    }

    /// Maximum number of attempts, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}
