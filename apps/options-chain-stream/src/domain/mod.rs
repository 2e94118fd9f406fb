//! Domain Layer - Core market data types and business rules.
//!
//! This layer contains the core domain types for option-chain streaming
//! with no I/O. All types here are pure Rust with serialization support.

/// Market data events, instrument identity and option-chain snapshots.
pub mod market_data;

/// Streaming connection lifecycle states.
pub mod streaming;

/// Subscription tracking.
pub mod subscription;
