//! Stream observer port.
//!
//! The streaming client reports snapshots and lifecycle events through a
//! [`StreamObserver`]. Callbacks run on the read-loop task and must return
//! promptly; implementations that do real work should hand off to another
//! task, which is what [`ChannelObserver`] does.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::domain::market_data::OptionSnapshot;
use crate::domain::streaming::ConnectionState;

/// Callbacks invoked by the streaming client.
///
/// Every method has a no-op default so observers implement only what they
/// need.
pub trait StreamObserver: Send + Sync {
    /// A fresh snapshot for the symbol of the event just ingested.
    fn on_snapshot(&self, snapshot: &OptionSnapshot) {
        let _ = snapshot;
    }

    /// A failure inside the streaming cycle (transport, protocol, auth,
    /// reconnect budget exhausted).
    fn on_error(&self, error: &(dyn Error + Send + Sync + 'static)) {
        let _ = error;
    }

    /// The steady-state loop ended.
    fn on_disconnect(&self) {}

    /// The handshake completed after at least one failure.
    fn on_reconnect(&self) {}

    /// The connection state machine moved.
    fn on_state_change(&self, state: ConnectionState) {
        let _ = state;
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

/// Owned form of an observer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Snapshot emitted.
    Snapshot(Box<OptionSnapshot>),
    /// Error reported (rendered message).
    Error(String),
    /// Steady-state loop ended.
    Disconnected,
    /// Reconnected after a failure.
    Reconnected,
    /// Connection state changed.
    StateChanged(ConnectionState),
}

/// Observer that forwards callbacks into a bounded channel.
///
/// Uses `try_send`, so a full channel drops the event (and counts it)
/// instead of blocking the read loop.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::Sender<StreamEvent>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: StreamEvent) {
        if self.tx.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(dropped, "Observer channel full, event dropped");
        }
    }
}

impl StreamObserver for ChannelObserver {
    fn on_snapshot(&self, snapshot: &OptionSnapshot) {
        self.forward(StreamEvent::Snapshot(Box::new(snapshot.clone())));
    }

    fn on_error(&self, error: &(dyn Error + Send + Sync + 'static)) {
        self.forward(StreamEvent::Error(error.to_string()));
    }

    fn on_disconnect(&self) {
        self.forward(StreamEvent::Disconnected);
    }

    fn on_reconnect(&self) {
        self.forward(StreamEvent::Reconnected);
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.forward(StreamEvent::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_events_in_order() {
        let (observer, mut rx) = ChannelObserver::new(8);

        observer.on_state_change(ConnectionState::Connecting);
        observer.on_disconnect();
        observer.on_reconnect();

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::StateChanged(ConnectionState::Connecting))
        );
        assert_eq!(rx.recv().await, Some(StreamEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(StreamEvent::Reconnected));
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (observer, _rx) = ChannelObserver::new(1);

        observer.on_disconnect();
        observer.on_disconnect();
        observer.on_disconnect();

        assert_eq!(observer.dropped(), 2);
    }

    #[test]
    fn error_is_rendered() {
        let (observer, mut rx) = ChannelObserver::new(1);
        let error = std::io::Error::other("boom");

        observer.on_error(&error);

        assert_eq!(rx.try_recv().ok(), Some(StreamEvent::Error("boom".to_string())));
    }
}
