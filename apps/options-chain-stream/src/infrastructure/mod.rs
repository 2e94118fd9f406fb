//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Tastytrade REST session and DXLink streaming adapters.
pub mod tasty;

/// Snapshot fan-out to consumer connections.
pub mod broadcast;

/// Rate limiting and retry for outbound calls.
pub mod resilience;

/// Configuration loading.
pub mod config;

/// Consumer web sockets, snapshot lookup and health endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
