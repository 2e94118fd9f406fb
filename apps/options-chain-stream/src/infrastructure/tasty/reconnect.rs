//! Reconnection Policy
//!
//! Bounded exponential backoff for the streaming connection. Tracks the
//! consecutive failure streak and computes the next delay, independent of
//! what is being reconnected.
//!
//! A quiet period longer than `reset_after` since the last attempt is taken
//! as evidence that the previous streak is over, and the backoff starts
//! fresh. No jitter is applied, so within a streak the delay never
//! decreases.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::application::ports::{Clock, SystemClock};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt of a streak.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Attempts allowed per streak.
    pub max_attempts: u32,
    /// Quiet period after which the streak resets.
    pub reset_after: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            reset_after: Duration::from_secs(300),
        }
    }
}

/// Reconnection backoff state machine.
///
/// # Example
///
/// ```rust
/// use options_chain_stream::infrastructure::tasty::{ReconnectConfig, ReconnectManager};
/// use std::time::Duration;
///
/// let mut manager = ReconnectManager::new(ReconnectConfig::default());
///
/// assert_eq!(manager.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(manager.next_delay(), Some(Duration::from_secs(2)));
///
/// // Successful reconnection
/// manager.reset();
/// assert_eq!(manager.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    clock: Arc<dyn Clock>,
    current_delay: Duration,
    attempt_count: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectManager {
    /// Create a manager using the tokio clock.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with an injected clock.
    #[must_use]
    pub fn with_clock(config: ReconnectConfig, clock: Arc<dyn Clock>) -> Self {
        let initial_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            clock,
            current_delay: initial_delay,
            attempt_count: 0,
            last_attempt: None,
        }
    }

    /// Next backoff delay, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let now = self.clock.now();

        let quiet = self
            .last_attempt
            .is_none_or(|last| now.saturating_duration_since(last) > self.config.reset_after);
        if quiet {
            self.reset();
        }

        if self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;
        self.last_attempt = Some(now);

        if self.attempt_count > 1 {
            self.current_delay = self
                .current_delay
                .saturating_mul(2)
                .min(self.config.max_delay);
        }

        Some(self.current_delay)
    }

    /// Restore the initial state after a successful reconnection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
        self.attempt_count = 0;
    }

    /// Attempts made in the current streak.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is available right now.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}
