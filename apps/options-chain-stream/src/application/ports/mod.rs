//! Port Interfaces
//!
//! Defines the interfaces (ports) between the streaming core and its
//! collaborators following the Hexagonal Architecture pattern. These are the
//! contracts that infrastructure adapters implement or consume.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`StreamObserver`]: snapshot, error, disconnect and reconnect callbacks
//! - [`ConsumerConnection`]: one downstream subscriber endpoint
//!
//! ## Driver Ports (Inbound)
//!
//! - [`SnapshotProvider`]: on-demand snapshot lookup keyed by symbol
//! - [`StreamStatus`]: connection state of the streaming client
//! - [`Clock`]: time source for backoff and rate limiting

mod clock;
mod consumer;
mod observer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use consumer::{ConnectionId, ConsumerConnection, ConsumerError};
#[cfg(test)]
pub use consumer::MockConsumerConnection;
pub use observer::{ChannelObserver, NoopObserver, StreamEvent, StreamObserver};

use crate::domain::market_data::OptionSnapshot;
use crate::domain::streaming::ConnectionState;

/// Source of the best currently-known snapshot for a symbol.
pub trait SnapshotProvider: Send + Sync {
    /// Synthesize the snapshot for `symbol`. Unknown symbols yield an
    /// all-zero snapshot rather than an error.
    fn snapshot(&self, symbol: &str) -> OptionSnapshot;

    /// Symbols with at least one cached event.
    fn symbols(&self) -> Vec<String>;
}

/// Read-only view of the streaming client for health reporting.
pub trait StreamStatus: Send + Sync {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Number of stored subscriptions.
    fn subscription_count(&self) -> usize;
}
