//! DXLink Streaming Client
//!
//! Maintains the single streaming connection to the quote feed, feeds every
//! decoded event into the [`EventAggregator`] and reports a fresh snapshot
//! for the event's symbol to the [`StreamObserver`].
//!
//! # Handshake
//!
//! The client is optimistic: it pipelines the whole handshake without
//! waiting for acknowledgements.
//!
//! 1. `SETUP` (protocol version, keepalive timeout)
//! 2. `AUTH` (session token, or the quote token from `/api-quote-tokens`)
//! 3. `CHANNEL_REQUEST` (feed service, `AUTO` contract)
//! 4. `FEED_SETUP` (compact format, requested fields per category)
//! 5. `FEED_SUBSCRIPTION` with `reset: true` and the full stored set
//!
//! The stored subscription set outlives the connection and is replayed on
//! every reconnect.
//!
//! # Failure
//!
//! Any read/write error, keepalive timeout, server close, protocol error or
//! auth revocation ends the connection. The observer is told, a mid-stream
//! auth failure forces a session refresh, and the [`ReconnectManager`]
//! decides how long to wait. Running out of attempts ends [`run`].
//!
//! [`run`]: StreamingClient::run

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, SessionManager};
use super::codec::{CodecError, DxLinkCodec};
use super::keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveManager, KeepaliveState};
use super::messages::{AuthStatus, ClientFrame, ServerFrame};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
use super::writer::{FrameWriter, WriteError};
use crate::application::ports::{StreamObserver, StreamStatus};
use crate::application::services::EventAggregator;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::{Subscription, SubscriptionSet};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can end a streaming connection or the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The streamer rejected or revoked authorization.
    #[error("streamer authorization failed: {0}")]
    Auth(String),

    /// Connection-level failure without a more specific cause.
    #[error("transport error: {0}")]
    Transport(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// Non-auth `ERROR` frame from the streamer.
    #[error("streamer error {error}: {message}")]
    Server {
        /// Error code.
        error: String,
        /// Error description.
        message: String,
    },

    /// The server closed the feed channel.
    #[error("feed channel {0} closed by server")]
    ChannelClosed(u32),

    /// Nothing received within the keepalive timeout.
    #[error("no data received for {0:?}")]
    KeepaliveTimeout(Duration),

    /// The server closed the connection.
    #[error("server closed the connection")]
    ServerClosed,

    /// Reconnection budget spent.
    #[error(transparent)]
    ReconnectExhausted(#[from] ReconnectError),

    /// Session or quote-token failure.
    #[error("session error: {0}")]
    Session(#[from] AuthError),
}

impl From<WriteError> for StreamError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Codec(e) => Self::Protocol(e),
            WriteError::WebSocket(e) => Self::WebSocket(e),
        }
    }
}

impl StreamError {
    /// Whether the session must be re-established before reconnecting.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Session(e) => e.is_unauthorized() || matches!(e, AuthError::NoSession),
            _ => false,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::WebSocket(_) => "websocket",
            Self::Protocol(_) => "protocol",
            Self::Server { .. } => "server",
            Self::ChannelClosed(_) => "channel_closed",
            Self::KeepaliveTimeout(_) => "keepalive_timeout",
            Self::ServerClosed => "server_closed",
            Self::ReconnectExhausted(_) => "reconnect_exhausted",
            Self::Session(_) => "session",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Where the streamer URL and `AUTH` token come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEndpoint {
    /// Fixed URL; `AUTH` carries the session token.
    Fixed(String),
    /// URL and token from `GET /api-quote-tokens` on every connect.
    QuoteToken,
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamingClientConfig {
    /// Endpoint resolution.
    pub endpoint: StreamEndpoint,
    /// Initial feed channel id.
    pub channel: u32,
    /// Keepalive behavior.
    pub keepalive: KeepaliveConfig,
    /// `acceptAggregationPeriod` in seconds.
    pub aggregation_period: f64,
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
}

impl StreamingClientConfig {
    /// Default feed channel.
    pub const DEFAULT_CHANNEL: u32 = 3;

    /// Create a configuration with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self {
            endpoint,
            channel: Self::DEFAULT_CHANNEL,
            keepalive: KeepaliveConfig::default(),
            aggregation_period: 0.1,
            connect_timeout: Duration::from_secs(15),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Streaming Client
// =============================================================================

/// Write side of the live connection plus its current feed channel.
struct LiveLink {
    writer: Arc<FrameWriter>,
    channel: AtomicU32,
}

/// Per-connection read state.
struct FrameReader {
    codec: DxLinkCodec,
    link: Arc<LiveLink>,
    authorized: bool,
}

/// Backoff state carried across connections of one `run`.
struct Recovery {
    policy: ReconnectManager,
    pending: bool,
}

/// DXLink streaming client.
pub struct StreamingClient {
    config: StreamingClientConfig,
    session: Arc<SessionManager>,
    aggregator: Arc<EventAggregator>,
    observer: Arc<dyn StreamObserver>,
    subscriptions: parking_lot::RwLock<SubscriptionSet>,
    channel: AtomicU32,
    subscription_gate: AsyncMutex<()>,
    link: parking_lot::RwLock<Option<Arc<LiveLink>>>,
    state: parking_lot::RwLock<ConnectionState>,
    shutdown: CancellationToken,
    run_cancel: parking_lot::Mutex<CancellationToken>,
}

impl StreamingClient {
    /// Create a client. `shutdown` ends every current and future `run`.
    #[must_use]
    pub fn new(
        config: StreamingClientConfig,
        session: Arc<SessionManager>,
        aggregator: Arc<EventAggregator>,
        observer: Arc<dyn StreamObserver>,
        shutdown: CancellationToken,
    ) -> Self {
        let channel = AtomicU32::new(config.channel);
        let run_cancel = parking_lot::Mutex::new(shutdown.child_token());
        Self {
            config,
            session,
            aggregator,
            observer,
            subscriptions: parking_lot::RwLock::new(SubscriptionSet::new()),
            channel,
            subscription_gate: AsyncMutex::new(()),
            link: parking_lot::RwLock::new(None),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            shutdown,
            run_cancel,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Stored subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.read().clone()
    }

    /// Feed channel used for the next (or current) connection.
    #[must_use]
    pub fn channel(&self) -> u32 {
        self.channel.load(Ordering::SeqCst)
    }

    /// Add subscriptions on a feed channel.
    ///
    /// While streaming on the same channel only the new subscriptions are
    /// sent. A different channel re-opens the feed there and replays the
    /// full set. Without a connection the set is stored for the next
    /// handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the live connection rejects the write; the set is
    /// updated regardless and replayed on reconnect.
    pub async fn subscribe(&self, channel: u32, subs: &[Subscription]) -> Result<(), StreamError> {
        let _gate = self.subscription_gate.lock().await;

        let added = self.subscriptions.write().extend(subs.iter().cloned());
        metrics::set_subscriptions(self.subscriptions.read().len());
        self.channel.store(channel, Ordering::SeqCst);

        let Some(link) = self.live_link() else {
            tracing::debug!(added = added.len(), "Stored subscriptions for next connection");
            return Ok(());
        };

        let live_channel = link.channel.load(Ordering::SeqCst);
        if live_channel != channel {
            tracing::info!(from = live_channel, to = channel, "Moving feed to a new channel");
            let all = self.subscriptions.read().to_vec();
            link.writer.send(&ClientFrame::channel_request(channel)).await?;
            link.writer.send(&feed_setup(channel, self.config.aggregation_period)).await?;
            link.channel.store(channel, Ordering::SeqCst);
            link.writer
                .send(&ClientFrame::subscription(channel, true, all, Vec::new()))
                .await?;
        } else if !added.is_empty() {
            tracing::debug!(channel, added = added.len(), "Adding subscriptions");
            link.writer
                .send(&ClientFrame::subscription(channel, false, added, Vec::new()))
                .await?;
        }
        Ok(())
    }

    /// Remove subscriptions from the stored set and the live feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the live connection rejects the write.
    pub async fn unsubscribe(&self, subs: &[Subscription]) -> Result<(), StreamError> {
        let _gate = self.subscription_gate.lock().await;

        let removed = self.subscriptions.write().remove(subs.iter().cloned());
        metrics::set_subscriptions(self.subscriptions.read().len());

        if removed.is_empty() {
            return Ok(());
        }
        if let Some(link) = self.live_link() {
            let channel = link.channel.load(Ordering::SeqCst);
            tracing::debug!(channel, removed = removed.len(), "Removing subscriptions");
            link.writer
                .send(&ClientFrame::subscription(channel, false, Vec::new(), removed))
                .await?;
        }
        Ok(())
    }

    /// Stop the current `run`, its keepalive task and the transport.
    ///
    /// The subscription set and session are kept, so `run` may be called
    /// again.
    pub async fn close(&self) {
        self.run_cancel.lock().cancel();
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Connect and stream until closed, shut down, or out of attempts.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ReconnectExhausted`] when the reconnect budget
    /// is spent, or [`StreamError::Session`] when a required session refresh
    /// fails.
    pub async fn run(&self) -> Result<(), StreamError> {
        let cancel = self.shutdown.child_token();
        *self.run_cancel.lock() = cancel.clone();

        let mut recovery = Recovery {
            policy: ReconnectManager::new(self.config.reconnect.clone()),
            pending: false,
        };

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            let outcome = self.connect_and_stream(&cancel, &mut recovery).await;
            self.teardown().await;
            let error = match outcome {
                Ok(()) => break Ok(()),
                Err(e) if cancel.is_cancelled() => {
                    tracing::debug!(error = %e, "Connection ended during shutdown");
                    break Ok(());
                }
                Err(e) => e,
            };

            tracing::warn!(error = %error, "Streaming connection failed");
            metrics::record_stream_error(error.kind());
            self.observer.on_error(&error);
            self.observer.on_disconnect();
            recovery.pending = true;

            if error.is_auth_failure() {
                tracing::info!("Refreshing session before reconnecting");
                self.session.invalidate().await;
                if let Err(e) = self.session.refresh().await {
                    let error = StreamError::Session(e);
                    tracing::error!(error = %error, "Session refresh failed");
                    self.observer.on_error(&error);
                    break Err(error);
                }
            }

            let Some(delay) = recovery.policy.next_delay() else {
                let error = StreamError::from(ReconnectError::MaxAttemptsExceeded(
                    recovery.policy.config().max_attempts,
                ));
                tracing::error!(error = %error, "Giving up on the streaming connection");
                self.observer.on_error(&error);
                break Err(error);
            };

            self.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect();
            tracing::info!(
                attempt = recovery.policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to streamer"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Streaming client cancelled during reconnect delay");
                    break Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Open the transport, run the handshake and the read loop.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn connect_and_stream(
        &self,
        cancel: &CancellationToken,
        recovery: &mut Recovery,
    ) -> Result<(), StreamError> {
        self.set_state(ConnectionState::Connecting);
        let (url, token) = self.resolve_endpoint().await?;

        tracing::info!(url = %url, "Connecting to streamer");
        let timeout = self.config.connect_timeout;
        let connect = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()));
        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| {
                StreamError::Transport(format!("connect timed out after {timeout:?}"))
            })??,
        };

        let (write, mut read) = ws_stream.split();
        let writer = Arc::new(FrameWriter::new(write));
        let link = self.handshake(&writer, &token).await?;

        let keepalive_state = Arc::new(KeepaliveState::new());
        let (keepalive_tx, mut keepalive_rx) = mpsc::channel(4);
        let keepalive_cancel = cancel.child_token();
        let _keepalive_guard = keepalive_cancel.clone().drop_guard();
        let keepalive = KeepaliveManager::new(
            self.config.keepalive.clone(),
            Arc::clone(&keepalive_state),
            Arc::clone(&writer),
            keepalive_tx,
            keepalive_cancel,
        );
        tokio::spawn(keepalive.run());

        self.set_state(ConnectionState::Streaming);
        let mut reader = FrameReader {
            codec: DxLinkCodec::new(),
            link,
            authorized: false,
        };

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                event = keepalive_rx.recv() => {
                    return Err(match event {
                        Some(KeepaliveEvent::Timeout(idle)) => StreamError::KeepaliveTimeout(idle),
                        Some(KeepaliveEvent::WriteFailed(reason)) => StreamError::Transport(reason),
                        None => StreamError::Transport("keepalive task stopped".to_string()),
                    });
                }
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Streamer connection ended");
                            return Err(StreamError::ServerClosed);
                        }
                    };
                    keepalive_state.record_received();

                    match message {
                        Message::Text(text) => {
                            self.handle_frame(text.as_str(), &mut reader, recovery)?;
                        }
                        Message::Ping(data) => {
                            writer.send_message(Message::Pong(data)).await?;
                        }
                        Message::Close(frame) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(StreamError::ServerClosed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Pipeline the handshake and publish the live link.
    async fn handshake(
        &self,
        writer: &Arc<FrameWriter>,
        token: &str,
    ) -> Result<Arc<LiveLink>, StreamError> {
        self.set_state(ConnectionState::AwaitingSetupAck);
        writer
            .send(&ClientFrame::setup(self.config.keepalive.timeout_secs()))
            .await?;

        self.set_state(ConnectionState::Authenticating);
        writer.send(&ClientFrame::auth(token)).await?;

        // Subscription changes wait until the replay below is on the wire.
        let _gate = self.subscription_gate.lock().await;
        let channel = self.channel.load(Ordering::SeqCst);

        self.set_state(ConnectionState::ChannelOpening);
        writer.send(&ClientFrame::channel_request(channel)).await?;

        self.set_state(ConnectionState::FeedConfiguring);
        writer
            .send(&feed_setup(channel, self.config.aggregation_period))
            .await?;

        let subscriptions = self.subscriptions.read().to_vec();
        tracing::info!(channel, subscriptions = subscriptions.len(), "Replaying subscriptions");
        writer
            .send(&ClientFrame::subscription(channel, true, subscriptions, Vec::new()))
            .await?;
        self.set_state(ConnectionState::Subscribed);

        let link = Arc::new(LiveLink {
            writer: Arc::clone(writer),
            channel: AtomicU32::new(channel),
        });
        *self.link.write() = Some(Arc::clone(&link));
        Ok(link)
    }

    fn handle_frame(
        &self,
        text: &str,
        reader: &mut FrameReader,
        recovery: &mut Recovery,
    ) -> Result<(), StreamError> {
        let feed_channel = reader.link.channel.load(Ordering::SeqCst);

        match reader.codec.decode(text)? {
            ServerFrame::Setup(setup) => {
                tracing::debug!(
                    version = ?setup.version,
                    keepalive_timeout = ?setup.keepalive_timeout,
                    "Server setup received"
                );
            }
            ServerFrame::AuthState(auth) => match auth.state {
                AuthStatus::Authorized if !reader.authorized => {
                    reader.authorized = true;
                    tracing::info!("Streamer authorized");
                    recovery.policy.reset();
                    if std::mem::take(&mut recovery.pending) {
                        tracing::info!("Reconnected to streamer");
                        self.observer.on_reconnect();
                    }
                }
                AuthStatus::Authorized => {}
                AuthStatus::Unauthorized if reader.authorized => {
                    return Err(StreamError::Auth("authorization revoked".to_string()));
                }
                AuthStatus::Unauthorized => tracing::debug!("Awaiting authorization"),
            },
            ServerFrame::ChannelOpened(status) => {
                tracing::info!(channel = status.channel, service = ?status.service, "Channel opened");
            }
            ServerFrame::ChannelClosed(status) if status.channel == feed_channel => {
                return Err(StreamError::ChannelClosed(status.channel));
            }
            ServerFrame::ChannelClosed(status) => {
                tracing::debug!(channel = status.channel, "Inactive channel closed");
            }
            ServerFrame::FeedConfig(config) if config.channel == feed_channel => {
                reader.codec.apply_feed_config(&config);
            }
            ServerFrame::FeedData(data) if data.channel == feed_channel => {
                self.ingest(&reader.codec, &data.data)?;
            }
            ServerFrame::FeedConfig(_) | ServerFrame::FeedData(_) => {
                tracing::trace!("Ignoring frame for inactive channel");
            }
            ServerFrame::Keepalive(_) => tracing::trace!("Keepalive received"),
            ServerFrame::Error(error) if error.is_auth_error() => {
                return Err(StreamError::Auth(format!("{}: {}", error.error, error.message)));
            }
            ServerFrame::Error(error) => {
                let error = StreamError::Server {
                    error: error.error,
                    message: error.message,
                };
                tracing::warn!(error = %error, "Streamer reported an error");
                metrics::record_stream_error(error.kind());
                self.observer.on_error(&error);
            }
            ServerFrame::Unknown => tracing::debug!("Ignoring unknown frame type"),
        }
        Ok(())
    }

    /// Aggregate decoded events and report one snapshot per event.
    fn ingest(&self, codec: &DxLinkCodec, data: &serde_json::Value) -> Result<(), StreamError> {
        for event in codec.decode_feed_data(data, Utc::now())? {
            let symbol = event.symbol().to_string();
            metrics::record_event_received(event.category());

            self.aggregator.handle_event(event);
            let snapshot = self.aggregator.snapshot(&symbol);
            metrics::record_snapshot_emitted();
            self.observer.on_snapshot(&snapshot);
        }
        Ok(())
    }

    async fn resolve_endpoint(&self) -> Result<(String, String), StreamError> {
        match &self.config.endpoint {
            StreamEndpoint::Fixed(url) => {
                let token = self
                    .session
                    .session_token()
                    .await
                    .ok_or(AuthError::NoSession)?;
                Ok((url.clone(), token))
            }
            StreamEndpoint::QuoteToken => {
                let quote = self.session.quote_token().await?;
                Ok((quote.dxlink_url, quote.token))
            }
        }
    }

    fn live_link(&self) -> Option<Arc<LiveLink>> {
        self.link.read().clone()
    }

    async fn teardown(&self) {
        let link = self.link.write().take();
        if let Some(link) = link {
            link.writer.close().await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state);
            self.observer.on_state_change(state);
        }
    }
}

impl StreamStatus for StreamingClient {
    fn state(&self) -> ConnectionState {
        Self::state(self)
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

fn feed_setup(channel: u32, aggregation_period: f64) -> ClientFrame {
    ClientFrame::feed_setup(
        channel,
        aggregation_period,
        DxLinkCodec::new().accept_event_fields(),
    )
}
