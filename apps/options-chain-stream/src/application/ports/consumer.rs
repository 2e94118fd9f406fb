//! Downstream consumer connection port.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

/// Identifier of one registered consumer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Failure writing to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The connection is closed.
    #[error("consumer connection closed")]
    Closed,

    /// The write did not complete within the write timeout.
    #[error("consumer write timed out")]
    Timeout,

    /// Transport-level write failure.
    #[error("consumer write failed: {0}")]
    Write(String),
}

/// One downstream subscriber (for example an open web socket).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerConnection: Send + Sync {
    /// Registry key of the connection.
    fn id(&self) -> ConnectionId;

    /// Write one serialized snapshot.
    async fn send(&self, payload: &str) -> Result<(), ConsumerError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}
