//! Web-socket consumer connection.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::Mutex;

use crate::application::ports::{ConnectionId, ConsumerConnection, ConsumerError};

/// Write half of a consumer web socket.
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    sink: Mutex<S>,
    closed: AtomicBool,
}

impl<S> WebSocketConnection<S> {
    /// Wrap a sink with a fresh connection id.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            id: ConnectionId::new(),
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<S> ConsumerConnection for WebSocketConnection<S>
where
    S: Sink<Message> + Send + Unpin + 'static,
    S::Error: Display,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, payload: &str) -> Result<(), ConsumerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConsumerError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(|e| ConsumerError::Write(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::channel::mpsc;

    use super::*;

    #[tokio::test]
    async fn sends_text_frames() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let connection = WebSocketConnection::new(tx);

        connection.send("{\"symbol\":\"AAPL\"}").await.unwrap();

        let Some(Message::Text(text)) = rx.next().await else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), "{\"symbol\":\"AAPL\"}");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let connection = WebSocketConnection::new(tx);

        connection.close().await;
        connection.close().await;

        assert_eq!(connection.send("x").await, Err(ConsumerError::Closed));
        assert!(matches!(rx.next().await, Some(Message::Close(None))));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_peer_is_a_write_error() {
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let connection = WebSocketConnection::new(tx);

        let result = connection.send("x").await;
        assert!(matches!(result, Err(ConsumerError::Write(_))));
    }
}
