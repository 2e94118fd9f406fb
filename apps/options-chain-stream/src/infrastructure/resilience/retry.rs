//! Bounded exponential-backoff retry.
//!
//! The delay before retry `n` (call `n + 1`) is `min(base * 2^(n-1), max)`.
//! No jitter is applied, so consecutive delays never decrease.
//!
//! Only wrap idempotent operations: the policy has no knowledge of what it
//! retries.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry errors.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of calls made.
        attempts: u32,
        /// Last error.
        #[source]
        source: E,
    },

    /// The operation failed with an error the caller marked as not
    /// retryable.
    #[error("{0}")]
    Permanent(#[source] E),

    /// Cancellation fired during an inter-attempt delay.
    #[error("retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The last operation error, if any.
    #[must_use]
    pub const fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::Permanent(source) => Some(source),
            Self::Cancelled => None,
        }
    }
}

/// Bounded-attempt exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of calls (0 is treated as 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry `retry` (1-based).
    #[must_use]
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Exhausted`] with the last error, or
    /// [`RetryError::Cancelled`] if `cancel` fires during a delay.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_with(cancel, op, |_| true).await
    }

    /// Like [`run`](Self::run), but stops early when `should_retry` returns
    /// `false` for an error.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Permanent`] for a non-retryable error, otherwise
    /// as [`run`](Self::run).
    pub async fn run_with<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&error) {
                return Err(RetryError::Permanent(error));
            }
            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.delay_before_retry(attempt);
            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = delay.as_millis(),
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
