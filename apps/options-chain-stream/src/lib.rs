#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Options Chain Stream - Market Data Streaming Client
//!
//! Maintains one persistent DXLink connection to the Tastytrade quote feed,
//! folds the per-category events it receives into option-chain snapshots and
//! fans every snapshot out to web-socket consumers.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core market data types with no I/O
//!   - `market_data`: Events, instrument identity, snapshots
//!   - `streaming`: Connection lifecycle states
//!   - `subscription`: Instrument/category subscription set
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Observer, consumer connection, clock, snapshot lookup
//!   - `services`: Event aggregation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tasty`: REST sessions and the DXLink streaming client
//!   - `resilience`: Rate limiting and retry
//!   - `broadcast`: Consumer fan-out
//!   - `http`: Consumer web sockets, snapshots and health
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                       +----------------+    +------------+    +-----------+
//! DXLink WS  --------> | StreamingClient | -> | Aggregator | -> | Broadcast | --> Consumer 1
//!   ^                   +----------------+    +------------+    +-----------+ --> Consumer N
//!   |  session / quote token
//! REST API <- SessionManager (rate limited, retried)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{
    ContractIdentity, EventCategory, GreeksEvent, MarketDataEvent, OptionContract,
    OptionSnapshot, OptionType, QuoteEvent, SummaryEvent, TradeEvent,
};
pub use domain::streaming::ConnectionState;
pub use domain::subscription::{Subscription, SubscriptionSet};

// Ports and services
pub use application::ports::{
    ChannelObserver, Clock, ConnectionId, ConsumerConnection, ConsumerError, ManualClock,
    NoopObserver, SnapshotProvider, StreamEvent, StreamObserver, StreamStatus, SystemClock,
};
pub use application::services::EventAggregator;

// Streaming client and sessions
pub use infrastructure::tasty::{
    AuthError, QuoteToken, ReconnectConfig, ReconnectManager, SessionConfig, SessionManager,
    StreamEndpoint, StreamError, StreamingClient, StreamingClientConfig,
};

// Resilience
pub use infrastructure::resilience::{RateLimitError, RateLimiter, RetryError, RetryPolicy};

// Broadcast
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastManager, WebSocketConnection};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, Environment, StreamConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
