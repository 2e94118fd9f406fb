//! Consumer Fan-out Integration Tests
//!
//! Connects real web-socket consumers through the HTTP server and checks
//! snapshot delivery, pruning and disconnect handling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use options_chain_stream::{
    BroadcastConfig, BroadcastManager, ConnectionId, ConnectionState, ConsumerConnection,
    ConsumerError, EventAggregator, HttpServer, HttpState, MarketDataEvent,
    OptionSnapshot, SnapshotProvider, StreamStatus, TradeEvent,
};

const WAIT: Duration = Duration::from_secs(5);

struct Streaming;

impl StreamStatus for Streaming {
    fn state(&self) -> ConnectionState {
        ConnectionState::Streaming
    }

    fn subscription_count(&self) -> usize {
        0
    }
}

struct Server {
    addr: String,
    broadcast: Arc<BroadcastManager>,
    aggregator: Arc<EventAggregator>,
    cancel: CancellationToken,
}

async fn start() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let broadcast = Arc::new(BroadcastManager::new(BroadcastConfig {
        write_timeout: Duration::from_millis(500),
    }));
    let aggregator = Arc::new(EventAggregator::new());
    let cancel = CancellationToken::new();

    let state = Arc::new(HttpState::new(
        "test".to_string(),
        Arc::clone(&broadcast),
        Arc::clone(&aggregator) as Arc<dyn SnapshotProvider>,
        Arc::new(Streaming),
        cancel.clone(),
    ));
    let server = HttpServer::new(0, state, cancel.clone());
    tokio::spawn(async move { server.serve(listener).await.unwrap() });

    Server {
        addr,
        broadcast,
        aggregator,
        cancel,
    }
}

async fn wait_for_consumers(broadcast: &BroadcastManager, expected: usize) {
    timeout(WAIT, async {
        while broadcast.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("consumer count never reached the expected value");
}

fn snapshot(symbol: &str) -> OptionSnapshot {
    OptionSnapshot {
        symbol: symbol.to_string(),
        underlying_price: Decimal::new(50_050, 2),
        updated: Utc::now(),
        calls: vec![],
        puts: vec![],
    }
}

struct BrokenConsumer {
    id: ConnectionId,
    closes: AtomicUsize,
}

#[async_trait]
impl ConsumerConnection for BrokenConsumer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, _payload: &str) -> Result<(), ConsumerError> {
        Err(ConsumerError::Write("broken pipe".to_string()))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn every_consumer_receives_the_snapshot() {
    let server = start().await;
    let url = format!("ws://{}/ws", server.addr);
    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    wait_for_consumers(&server.broadcast, 2).await;

    assert_eq!(server.broadcast.broadcast(&snapshot("SPY")).await, 2);

    for consumer in [&mut first, &mut second] {
        let message = timeout(WAIT, consumer.next()).await.unwrap().unwrap().unwrap();
        let Message::Text(text) = message else {
            panic!("expected a text frame, got {message:?}");
        };
        let body: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(body["symbol"], "SPY");
        assert_eq!(body["underlyingPrice"], "500.50");
    }

    server.cancel.cancel();
}

#[tokio::test]
async fn disconnected_consumer_is_removed() {
    let server = start().await;
    let url = format!("ws://{}/ws", server.addr);
    let (mut consumer, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    wait_for_consumers(&server.broadcast, 1).await;

    consumer.close(None).await.unwrap();
    wait_for_consumers(&server.broadcast, 0).await;

    assert_eq!(server.broadcast.broadcast(&snapshot("SPY")).await, 0);
    server.cancel.cancel();
}

#[tokio::test]
async fn failing_consumer_does_not_affect_others() {
    let server = start().await;
    let url = format!("ws://{}/ws", server.addr);
    let (mut healthy, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    wait_for_consumers(&server.broadcast, 1).await;

    let broken = Arc::new(BrokenConsumer {
        id: ConnectionId::new(),
        closes: AtomicUsize::new(0),
    });
    server.broadcast.register(broken.clone()).await;

    assert_eq!(server.broadcast.broadcast(&snapshot("QQQ")).await, 1);
    assert_eq!(broken.closes.load(Ordering::SeqCst), 1);
    assert_eq!(server.broadcast.len().await, 1);

    let message = timeout(WAIT, healthy.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(message, Message::Text(text) if text.as_str().contains("\"QQQ\"")));
    server.cancel.cancel();
}

#[tokio::test]
async fn snapshot_endpoint_reflects_aggregated_events() {
    let server = start().await;
    server.aggregator.handle_event(MarketDataEvent::Trade(TradeEvent {
        symbol: ".SPY240621C500".to_string(),
        timestamp: Utc::now(),
        price: Decimal::new(1234, 2),
        day_volume: 42.0,
        size: 1.0,
    }));

    let body: serde_json::Value = reqwest::get(format!(
        "http://{}/api/options/.SPY240621C500",
        server.addr
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    assert_eq!(body["symbol"], ".SPY240621C500");
    assert_eq!(body["underlyingPrice"], "12.34");
    assert_eq!(body["calls"][0]["volume"], 42);
    assert_eq!(body["calls"][0]["strike"], "500");
    assert_eq!(body["puts"], serde_json::json!([]));
    server.cancel.cancel();
}
