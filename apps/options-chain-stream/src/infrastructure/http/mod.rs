//! HTTP Surface
//!
//! Consumer web sockets, on-demand snapshots, health checks and Prometheus
//! metrics on a single port.
//!
//! # Endpoints
//!
//! - `GET /ws` - Web-socket upgrade; the socket receives every snapshot
//! - `GET /api/options/{symbol}` - Current snapshot for one symbol
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (streaming or not)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConsumerConnection, SnapshotProvider, StreamStatus};
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::broadcast::{BroadcastManager, WebSocketConnection};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Streaming connection status.
    pub stream: StreamInfo,
    /// Registered consumer connections.
    pub consumers: usize,
    /// Stored subscriptions.
    pub subscriptions: usize,
    /// Symbols with cached events.
    pub symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Handshaking or reconnecting.
    Degraded,
    /// No connection and none in progress.
    Unhealthy,
}

impl HealthStatus {
    /// Derive health from the connection state.
    #[must_use]
    pub const fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Streaming => Self::Healthy,
            ConnectionState::Disconnected => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }
}

/// Streaming connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is streaming.
    pub streaming: bool,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct HttpState {
    version: String,
    started_at: Instant,
    broadcast: Arc<BroadcastManager>,
    snapshots: Arc<dyn SnapshotProvider>,
    stream: Arc<dyn StreamStatus>,
    cancel: CancellationToken,
}

impl HttpState {
    /// Create new server state. Open sockets are released when `cancel`
    /// fires.
    #[must_use]
    pub fn new(
        version: String,
        broadcast: Arc<BroadcastManager>,
        snapshots: Arc<dyn SnapshotProvider>,
        stream: Arc<dyn StreamStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            broadcast,
            snapshots,
            stream,
            cancel,
        }
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Build the router over shared state.
#[must_use]
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/options/{symbol}", get(snapshot_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// HTTP server for consumers, snapshots and health checks.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if the server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<HttpState>>) -> Response {
    ws.on_upgrade(move |socket| consumer_session(socket, state))
}

/// Register the socket and hold it until the peer goes away.
///
/// Inbound frames are read only to notice the disconnect; pings are
/// answered by the socket itself.
async fn consumer_session(socket: WebSocket, state: Arc<HttpState>) {
    let (sink, mut inbound) = socket.split();
    let connection: Arc<dyn ConsumerConnection> = Arc::new(WebSocketConnection::new(sink));
    let id = state.broadcast.register(Arc::clone(&connection)).await;
    tracing::info!(connection = %id, "Consumer connected");

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Consumer read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcast.remove(id).await;
    connection.close().await;
    tracing::info!(connection = %id, "Consumer disconnected");
}

async fn snapshot_handler(
    Path(symbol): Path<String>,
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    Json(state.snapshots.snapshot(&symbol))
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.stream.state().is_streaming() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &HttpState) -> HealthResponse {
    let connection_state = state.stream.state();

    HealthResponse {
        status: HealthStatus::from_state(connection_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamInfo {
            state: connection_state,
            streaming: connection_state.is_streaming(),
        },
        consumers: state.broadcast.len().await,
        subscriptions: state.stream.subscription_count(),
        symbols: state.snapshots.symbols().len(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
