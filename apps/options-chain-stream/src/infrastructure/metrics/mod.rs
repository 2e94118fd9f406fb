//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: market-data events received by category
//! - **Snapshots**: snapshots emitted and delivered to consumers
//! - **Connections**: streaming connection state and registered consumers
//! - **Failures**: reconnects, protocol errors, pruned consumers, auth refreshes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market_data::EventCategory;
use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "options_stream_events_received_total",
        "Market-data events decoded from the streamer, by category"
    );
    describe_counter!(
        "options_stream_snapshots_emitted_total",
        "Snapshots produced by the aggregator"
    );
    describe_counter!(
        "options_stream_snapshots_delivered_total",
        "Snapshot writes delivered to consumers"
    );
    describe_counter!(
        "options_stream_consumers_pruned_total",
        "Consumers removed after a failed or timed-out write"
    );

    describe_gauge!(
        "options_stream_consumers",
        "Number of registered consumer connections"
    );
    describe_gauge!(
        "options_stream_subscriptions",
        "Number of stored subscriptions"
    );
    describe_gauge!(
        "options_stream_connection_state",
        "Streaming connection state code (0 = disconnected, 7 = streaming)"
    );

    describe_counter!(
        "options_stream_reconnects_total",
        "Streaming reconnection attempts"
    );
    describe_counter!(
        "options_stream_errors_total",
        "Streaming failures by kind"
    );
    describe_counter!(
        "options_stream_auth_refreshes_total",
        "Session refreshes by method"
    );

    describe_histogram!(
        "options_stream_broadcast_seconds",
        "Time to deliver one snapshot to every consumer"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event decoded from the streamer.
pub fn record_event_received(category: EventCategory) {
    counter!(
        "options_stream_events_received_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a snapshot produced by the aggregator.
pub fn record_snapshot_emitted() {
    counter!("options_stream_snapshots_emitted_total").increment(1);
}

/// Record one broadcast: deliveries, pruned consumers and elapsed time.
pub fn record_broadcast(delivered: usize, pruned: usize, duration: Duration) {
    counter!("options_stream_snapshots_delivered_total").increment(delivered as u64);
    if pruned > 0 {
        counter!("options_stream_consumers_pruned_total").increment(pruned as u64);
    }
    histogram!("options_stream_broadcast_seconds").record(duration.as_secs_f64());
}

/// Update the registered consumer count.
#[allow(clippy::cast_precision_loss)]
pub fn set_consumers(count: usize) {
    gauge!("options_stream_consumers").set(count as f64);
}

/// Update the stored subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("options_stream_subscriptions").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("options_stream_connection_state").set(f64::from(state.code()));
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("options_stream_reconnects_total").increment(1);
}

/// Record a streaming failure.
pub fn record_stream_error(kind: &'static str) {
    counter!("options_stream_errors_total", "kind" => kind).increment(1);
}

/// Record a session refresh.
pub fn record_auth_refresh(method: &'static str) {
    counter!("options_stream_auth_refreshes_total", "method" => method).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
