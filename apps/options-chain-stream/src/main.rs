//! Options Chain Stream Binary
//!
//! Starts the DXLink streaming client and the consumer HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin options-chain-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TASTY_USERNAME` and `TASTY_PASSWORD`, or `TASTY_SESSION_TOKEN`
//!
//! ## Optional
//! - `TASTY_ENVIRONMENT`: sandbox | production (default: sandbox)
//! - `TASTY_BASE_URL`: REST base URL (default: per environment)
//! - `TASTY_STREAMER_URL`: fixed DXLink URL (default: from the quote token)
//! - `STREAM_SYMBOLS`: comma-separated symbols subscribed at startup
//! - `HTTP_PORT`: consumer/health HTTP port (default: 8080)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: options-chain-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use options_chain_stream::infrastructure::http::{HttpServer, HttpState};
use options_chain_stream::infrastructure::telemetry;
use options_chain_stream::{
    BroadcastManager, ChannelObserver, EventAggregator, EventCategory, SessionManager,
    StreamConfig, StreamStatus, StreamingClient, Subscription, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the observer-to-broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err("failed to install rustls crypto provider".into());
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Options Chain Stream");

    let _metrics_handle = init_metrics()?;

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    // Kept separate from the shutdown token so logout still runs after it fires.
    let session_cancel = CancellationToken::new();

    let mut session = SessionManager::new(config.session_config(), session_cancel.clone())?;
    if let Some(token) = config.credentials.session_token() {
        session = session.with_session_token(token);
    }
    let session = Arc::new(session);
    if let Some((username, password)) = config.credentials.login() {
        session.login(username, password).await?;
    }

    let aggregator = Arc::new(EventAggregator::new());
    let broadcast = Arc::new(BroadcastManager::new(config.broadcast));
    let (observer, events) = ChannelObserver::new(EVENT_CHANNEL_CAPACITY);

    let client = Arc::new(StreamingClient::new(
        config.streaming_config(),
        Arc::clone(&session),
        Arc::clone(&aggregator),
        Arc::new(observer),
        shutdown_token.clone(),
    ));

    if !config.stream.symbols.is_empty() {
        let subscriptions = Subscription::for_symbols(&config.stream.symbols, EventCategory::all());
        tracing::info!(
            symbols = config.stream.symbols.len(),
            subscriptions = subscriptions.len(),
            "Subscribing at startup"
        );
        client
            .subscribe(config.stream.channel, &subscriptions)
            .await?;
    }

    let forwarder = tokio::spawn(Arc::clone(&broadcast).forward(events, shutdown_token.clone()));

    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&broadcast),
        aggregator,
        Arc::clone(&client) as Arc<dyn StreamStatus>,
        shutdown_token.clone(),
    ));
    let http_server = HttpServer::new(config.server.http_port, http_state, shutdown_token.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    let stream_client = Arc::clone(&client);
    let stream_shutdown = shutdown_token.clone();
    let stream_handle = tokio::spawn(async move {
        match stream_client.run().await {
            Ok(()) => tracing::info!("Streaming client stopped"),
            Err(e) => {
                tracing::error!(error = %e, "Streaming client failed");
                stream_shutdown.cancel();
            }
        }
    });

    tracing::info!("Options chain stream ready");

    await_shutdown(shutdown_token).await;

    client.close().await;
    broadcast.close_all().await;
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Logout failed"),
        Err(_) => tracing::warn!("Logout timed out"),
    }
    session_cancel.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(stream_handle, http_handle, forwarder);
    })
    .await;

    tracing::info!("Options chain stream stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        base_url = %config.base_url,
        channel = config.stream.channel,
        symbols = config.stream.symbols.len(),
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        streamer_url = ?config.stream.streamer_url,
        keepalive_interval_secs = config.stream.keepalive_interval.as_secs(),
        max_reconnect_attempts = config.reconnect.max_attempts,
        "Streaming settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT) or an internal shutdown.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
