//! Snapshot Broadcast
//!
//! Fans option-chain snapshots out to every registered consumer connection.
//!
//! # Architecture
//!
//! The `BroadcastManager` owns the registry of live connections. Every
//! snapshot is serialized once and written to all connections concurrently,
//! each write bounded by the write timeout. A connection whose write fails
//! or times out is removed and closed without affecting delivery to the
//! others.
//!
//! Registration, removal and broadcast serialize on one lock, so once
//! `remove` has returned the connection receives no further writes.

mod websocket;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

pub use websocket::WebSocketConnection;

use crate::application::ports::{ConnectionId, ConsumerConnection, ConsumerError, StreamEvent};
use crate::domain::market_data::OptionSnapshot;
use crate::infrastructure::metrics;

// =============================================================================
// Broadcast Manager
// =============================================================================

/// Configuration for snapshot delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Upper bound on a single consumer write.
    pub write_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Registry of consumer connections.
pub struct BroadcastManager {
    config: BroadcastConfig,
    connections: Mutex<Vec<Arc<dyn ConsumerConnection>>>,
}

impl std::fmt::Debug for BroadcastManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

impl BroadcastManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Register a connection.
    pub async fn register(&self, connection: Arc<dyn ConsumerConnection>) -> ConnectionId {
        let id = connection.id();
        let mut connections = self.connections.lock().await;
        connections.push(connection);
        metrics::set_consumers(connections.len());
        drop(connections);

        tracing::debug!(connection = %id, "Consumer registered");
        id
    }

    /// Remove a connection. Returns whether it was registered.
    ///
    /// The connection is not closed; its owner does that.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        let before = connections.len();
        connections.retain(|c| c.id() != id);
        let removed = connections.len() != before;
        metrics::set_consumers(connections.len());
        drop(connections);

        if removed {
            tracing::debug!(connection = %id, "Consumer removed");
        }
        removed
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Write a snapshot to every connection.
    ///
    /// Connections whose write fails or times out are removed and closed.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, snapshot: &OptionSnapshot) -> usize {
        let mut connections = self.connections.lock().await;
        if connections.is_empty() {
            return 0;
        }

        let payload = match serde_json::to_string(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, symbol = %snapshot.symbol, "Failed to serialize snapshot");
                return 0;
            }
        };

        let started = Instant::now();
        let write_timeout = self.config.write_timeout;
        let results = join_all(connections.iter().map(|connection| {
            let payload = payload.as_str();
            async move {
                tokio::time::timeout(write_timeout, connection.send(payload))
                    .await
                    .unwrap_or(Err(ConsumerError::Timeout))
            }
        }))
        .await;

        let failed: Vec<ConnectionId> = connections
            .iter()
            .zip(&results)
            .filter_map(|(connection, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!(connection = %connection.id(), error = %e, "Pruning consumer");
                    Some(connection.id())
                }
            })
            .collect();
        let delivered = results.len() - failed.len();

        let mut pruned = Vec::with_capacity(failed.len());
        connections.retain(|connection| {
            if failed.contains(&connection.id()) {
                pruned.push(Arc::clone(connection));
                false
            } else {
                true
            }
        });
        metrics::set_consumers(connections.len());
        drop(connections);

        for connection in &pruned {
            connection.close().await;
        }
        metrics::record_broadcast(delivered, pruned.len(), started.elapsed());
        delivered
    }

    /// Close and remove every connection.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain(..).collect();
        metrics::set_consumers(0);
        for connection in drained {
            connection.close().await;
        }
    }

    /// Broadcast snapshots arriving from a [`ChannelObserver`] until the
    /// channel closes or `cancel` fires.
    ///
    /// [`ChannelObserver`]: crate::application::ports::ChannelObserver
    pub async fn forward(
        self: Arc<Self>,
        mut events: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(StreamEvent::Snapshot(snapshot)) => {
                        self.broadcast(&snapshot).await;
                    }
                    Some(StreamEvent::Error(message)) => {
                        tracing::debug!(error = %message, "Stream error reported");
                    }
                    Some(StreamEvent::StateChanged(state)) => {
                        tracing::trace!(%state, "Stream state changed");
                    }
                    Some(StreamEvent::Disconnected | StreamEvent::Reconnected) => {}
                    None => break,
                },
            }
        }
        tracing::debug!("Snapshot forwarder stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockConsumerConnection;

    fn snapshot(symbol: &str) -> OptionSnapshot {
        OptionSnapshot {
            symbol: symbol.to_string(),
            underlying_price: Decimal::new(15025, 2),
            updated: Utc::now(),
            calls: vec![],
            puts: vec![],
        }
    }

    fn consumer(ok: bool, closes: usize) -> (Arc<MockConsumerConnection>, ConnectionId) {
        let id = ConnectionId::new();
        let mut mock = MockConsumerConnection::new();
        mock.expect_id().return_const(id);
        mock.expect_send().returning(move |_| {
            if ok {
                Ok(())
            } else {
                Err(ConsumerError::Closed)
            }
        });
        mock.expect_close().times(closes).return_const(());
        (Arc::new(mock), id)
    }

    #[tokio::test]
    async fn broadcast_with_no_connections_is_noop() {
        let manager = BroadcastManager::default();
        assert_eq!(manager.broadcast(&snapshot("AAPL")).await, 0);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn delivers_to_every_connection() {
        let manager = BroadcastManager::default();
        for _ in 0..3 {
            let (connection, _) = consumer(true, 0);
            manager.register(connection).await;
        }

        assert_eq!(manager.broadcast(&snapshot("AAPL")).await, 3);
        assert_eq!(manager.len().await, 3);
    }

    #[tokio::test]
    async fn failed_write_prunes_only_that_connection() {
        let manager = BroadcastManager::default();
        let (good_a, good_a_id) = consumer(true, 0);
        let (bad, bad_id) = consumer(false, 1);
        let (good_b, good_b_id) = consumer(true, 0);
        manager.register(good_a).await;
        manager.register(bad).await;
        manager.register(good_b).await;

        assert_eq!(manager.broadcast(&snapshot("AAPL")).await, 2);
        assert_eq!(manager.len().await, 2);
        assert!(!manager.remove(bad_id).await);
        assert!(manager.remove(good_a_id).await);
        assert!(manager.remove(good_b_id).await);
    }

    #[tokio::test]
    async fn payload_is_the_serialized_snapshot() {
        let manager = BroadcastManager::default();
        let id = ConnectionId::new();
        let mut mock = MockConsumerConnection::new();
        mock.expect_id().return_const(id);
        mock.expect_send()
            .withf(|payload| {
                let value: serde_json::Value = serde_json::from_str(payload).unwrap();
                value["symbol"] == "SPY" && value["underlyingPrice"] == "150.25"
            })
            .times(1)
            .returning(|_| Ok(()));
        manager.register(Arc::new(mock)).await;

        assert_eq!(manager.broadcast(&snapshot("SPY")).await, 1);
    }

    #[tokio::test]
    async fn removed_connection_receives_nothing() {
        let manager = BroadcastManager::default();
        let id = ConnectionId::new();
        let mut mock = MockConsumerConnection::new();
        mock.expect_id().return_const(id);
        mock.expect_send().never();
        manager.register(Arc::new(mock)).await;

        assert!(manager.remove(id).await);
        assert_eq!(manager.broadcast(&snapshot("AAPL")).await, 0);
    }

    struct SlowConsumer {
        id: ConnectionId,
        closed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConsumerConnection for SlowConsumer {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send(&self, _payload: &str) -> Result<(), ConsumerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_times_out_and_is_pruned() {
        let manager = BroadcastManager::new(BroadcastConfig {
            write_timeout: Duration::from_millis(100),
        });
        let slow = Arc::new(SlowConsumer {
            id: ConnectionId::new(),
            closed: AtomicUsize::new(0),
        });
        let (fast, _) = consumer(true, 0);
        manager.register(slow.clone()).await;
        manager.register(fast).await;

        assert_eq!(manager.broadcast(&snapshot("AAPL")).await, 1);
        assert_eq!(manager.len().await, 1);
        assert_eq!(slow.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forward_broadcasts_snapshot_events() {
        let manager = Arc::new(BroadcastManager::default());
        let (connection, _) = consumer(true, 0);
        manager.register(connection).await;

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&manager).forward(rx, cancel.clone()));

        tx.send(StreamEvent::Snapshot(Box::new(snapshot("AAPL"))))
            .await
            .unwrap();
        tx.send(StreamEvent::Disconnected).await.unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn close_all_closes_every_connection() {
        let manager = BroadcastManager::default();
        let (a, _) = consumer(true, 1);
        let (b, _) = consumer(true, 1);
        manager.register(a).await;
        manager.register(b).await;

        manager.close_all().await;
        assert!(manager.is_empty().await);
    }
}
