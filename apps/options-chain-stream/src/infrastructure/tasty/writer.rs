//! Shared outbound frame writer.
//!
//! Every outbound frame of a connection (handshake, subscription changes,
//! keepalive, pong) goes through one [`FrameWriter`], whose lock guarantees
//! that concurrent writers never interleave partial frames on the wire.

use std::pin::Pin;

use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::codec::CodecError;
use super::messages::ClientFrame;

type BoxedSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Lock-guarded write half of a streaming connection.
pub struct FrameWriter {
    sink: Mutex<BoxedSink>,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}

/// Errors writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The transport rejected the write.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

impl FrameWriter {
    /// Wrap the write half of a transport.
    #[must_use]
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
    {
        Self {
            sink: Mutex::new(Box::pin(sink)),
        }
    }

    /// Encode and send one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport write fails.
    pub async fn send(&self, frame: &ClientFrame) -> Result<(), WriteError> {
        let text = serde_json::to_string(frame).map_err(CodecError::from)?;
        self.send_message(Message::Text(text.into())).await?;
        tracing::trace!(frame = frame.kind(), "Sent frame");
        Ok(())
    }

    /// Send a raw transport message (pong replies).
    ///
    /// # Errors
    ///
    /// Returns an error if the transport write fails.
    pub async fn send_message(&self, message: Message) -> Result<(), WsError> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await
    }

    /// Close the write half, ignoring errors from an already-dead transport.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Transport close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::channel::mpsc;
    use futures_util::StreamExt;

    use super::*;

    fn channel_writer() -> (FrameWriter, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded();
        let sink = tx.sink_map_err(|_| WsError::ConnectionClosed);
        (FrameWriter::new(sink), rx)
    }

    #[tokio::test]
    async fn sends_frames_as_json_text() {
        let (writer, mut rx) = channel_writer();

        writer.send(&ClientFrame::keepalive()).await.unwrap();

        let Some(Message::Text(text)) = rx.next().await else {
            panic!("expected a text message");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "KEEPALIVE");
        assert_eq!(value["channel"], 0);
    }

    #[tokio::test]
    async fn concurrent_writers_produce_whole_frames() {
        let (writer, rx) = channel_writer();
        let writer = Arc::new(writer);

        let mut handles = vec![];
        for i in 0..20 {
            let writer = Arc::clone(&writer);
            handles.push(tokio::spawn(async move {
                let frame = if i % 2 == 0 {
                    ClientFrame::keepalive()
                } else {
                    ClientFrame::auth(format!("token-{i}"))
                };
                writer.send(&frame).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(writer);

        let messages: Vec<Message> = rx.collect().await;
        assert_eq!(messages.len(), 20);
        for message in messages {
            let Message::Text(text) = message else {
                panic!("expected a text message");
            };
            let frame: ClientFrame = serde_json::from_str(text.as_str()).unwrap();
            assert!(matches!(frame, ClientFrame::Keepalive(_) | ClientFrame::Auth(_)));
        }
    }

    #[tokio::test]
    async fn closed_transport_is_an_error() {
        let (writer, rx) = channel_writer();
        drop(rx);

        let result = writer.send(&ClientFrame::keepalive()).await;
        assert!(matches!(result, Err(WriteError::WebSocket(_))));
    }
}
