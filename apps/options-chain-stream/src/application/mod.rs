//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the streaming core interacts with its collaborators.

/// Port interfaces (observer, consumer connection, clock, snapshot lookup).
pub mod ports;

/// Application services (event aggregation).
pub mod services;
