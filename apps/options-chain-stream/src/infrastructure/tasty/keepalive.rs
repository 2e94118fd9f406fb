//! Keepalive Manager
//!
//! Sends DXLink `KEEPALIVE` frames on a fixed interval for the lifetime of a
//! connection, independent of read/write traffic, and watches inbound
//! silence. When nothing has been received for the keepalive timeout the
//! connection is considered dead and the read loop is told to reconnect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::messages::ClientFrame;
use super::writer::FrameWriter;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between outbound `KEEPALIVE` frames.
    pub interval: Duration,
    /// Declared keepalive timeout; also the inbound silence limit.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Timeout in whole seconds for the `SETUP` frame (at least 1).
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }
}

/// Events reported by the keepalive manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// Nothing received for longer than the timeout.
    Timeout(Duration),
    /// Sending a `KEEPALIVE` frame failed.
    WriteFailed(String),
}

/// Inbound liveness shared between the read loop and the manager.
#[derive(Debug)]
pub struct KeepaliveState {
    last_received: RwLock<Instant>,
}

impl Default for KeepaliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepaliveState {
    /// Create state with "received just now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_received: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame was received.
    pub fn record_received(&self) {
        *self.last_received.write() = Instant::now();
    }

    /// Instant of the last received frame.
    #[must_use]
    pub fn last_received(&self) -> Instant {
        *self.last_received.read()
    }

    /// Time since the last received frame.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_received().elapsed()
    }
}

/// Keepalive sender and silence detector for one connection.
pub struct KeepaliveManager {
    config: KeepaliveConfig,
    state: Arc<KeepaliveState>,
    writer: Arc<FrameWriter>,
    event_tx: mpsc::Sender<KeepaliveEvent>,
    cancel: CancellationToken,
}

impl KeepaliveManager {
    /// Create a new keepalive manager.
    #[must_use]
    pub const fn new(
        config: KeepaliveConfig,
        state: Arc<KeepaliveState>,
        writer: Arc<FrameWriter>,
        event_tx: mpsc::Sender<KeepaliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            writer,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, a timeout is detected, or a write fails.
    ///
    /// The first `KEEPALIVE` goes out one interval after start.
    pub async fn run(self) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.state.last_received() + self.config.timeout;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keepalive manager cancelled");
                    break;
                }
                () = tokio::time::sleep_until(deadline) => {
                    let idle = self.state.idle();
                    if idle >= self.config.timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.timeout.as_secs(),
                            "Keepalive timeout detected"
                        );
                        let _ = self.event_tx.send(KeepaliveEvent::Timeout(idle)).await;
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.writer.send(&ClientFrame::keepalive()).await {
                        tracing::debug!(error = %e, "Keepalive write failed");
                        let _ = self
                            .event_tx
                            .send(KeepaliveEvent::WriteFailed(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
        }
    }
}
