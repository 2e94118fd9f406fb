//! Minimum-interval rate limiter.
//!
//! A token bucket of depth one: tracks only the instant of the last grant.
//! The first call never waits. Concurrent waiters queue on the internal lock
//! and are granted one interval apart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Clock, SystemClock};

/// Rate limiter errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Cancellation fired before the interval elapsed.
    #[error("rate limit wait cancelled")]
    Cancelled,
}

/// Enforces a minimum interval between granted calls.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter using the tokio clock.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(SystemClock))
    }

    /// Create a limiter with an injected clock.
    #[must_use]
    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            last_grant: Mutex::new(None),
        }
    }

    /// Configured minimum interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is permitted.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Cancelled`] if `cancel` fires first. A
    /// cancelled wait does not consume a grant.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        let mut last_grant = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            guard = self.last_grant.lock() => guard,
        };

        if let Some(previous) = *last_grant {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if let Some(remaining) = self.interval.checked_sub(elapsed).filter(|d| !d.is_zero()) {
                tracing::trace!(wait_ms = remaining.as_millis(), "Rate limiting request");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                    () = tokio::time::sleep(remaining) => {}
                }
            }
        }

        *last_grant = Some(self.clock.now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.wait(&cancel).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_waits_for_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();

        limiter.wait(&cancel).await.unwrap();
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(101));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_interval_has_passed() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();

        limiter.wait(&cancel).await.unwrap();
        tokio::time::advance(Duration::from_millis(250)).await;
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(limiter.wait(&cancel).await, Err(RateLimitError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50)));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut handles = vec![];
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait(&cancel).await.unwrap();
                Instant::now()
            }));
        }

        let mut grants = vec![];
        for handle in handles {
            grants.push(handle.await.unwrap() - start);
        }
        grants.sort();

        assert_eq!(grants[0], Duration::ZERO);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }
}
