//! Configuration Module
//!
//! Configuration loading for the stream service.

mod settings;

pub use settings::{
    ConfigError, Credentials, Environment, RestSettings, ServerSettings, StreamConfig,
    StreamSettings,
};
