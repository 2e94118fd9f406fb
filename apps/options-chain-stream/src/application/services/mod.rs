//! Application Services
//!
//! Services that orchestrate domain logic between ports.
//!
//! - [`EventAggregator`]: folds partial category events into per-symbol
//!   option-chain snapshots

mod aggregator;

pub use aggregator::EventAggregator;
