//! Stream Configuration Settings
//!
//! Configuration types for the options-chain stream, loaded from environment
//! variables.

use std::time::Duration;

use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::resilience::RetryPolicy;
use crate::infrastructure::tasty::{
    KeepaliveConfig, ReconnectConfig, SessionConfig, StreamEndpoint, StreamingClientConfig,
};

/// Brokerage environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Certification sandbox.
    #[default]
    Sandbox,
    /// Production (real accounts).
    Production,
}

impl Environment {
    /// Parse environment from string.
    ///
    /// # Errors
    ///
    /// Returns an error for anything but `sandbox` or `production`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                key: "TASTY_ENVIRONMENT".to_string(),
                value: s.to_string(),
            }),
        }
    }

    /// Check if this is the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }

    /// Default REST base URL.
    #[must_use]
    pub const fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://api.cert.tastyworks.com",
            Self::Production => "https://api.tastytrade.com",
        }
    }
}

/// Brokerage login credentials.
///
/// Either a pre-issued session token or a username and password.
#[derive(Clone)]
pub struct Credentials {
    username: Option<String>,
    password: Option<String>,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(
        username: Option<String>,
        password: Option<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            username,
            password,
            session_token,
        }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Get the pre-issued session token.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Username and password, when both are present.
    #[must_use]
    pub fn login(&self) -> Option<(&str, &str)> {
        self.username().zip(self.password())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// DXLink streaming settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Fixed streamer URL; quote-token resolution when unset.
    pub streamer_url: Option<String>,
    /// Symbols subscribed at startup.
    pub symbols: Vec<String>,
    /// Feed channel id.
    pub channel: u32,
    /// Keepalive frame interval.
    pub keepalive_interval: Duration,
    /// Declared keepalive timeout and inbound silence limit.
    pub keepalive_timeout: Duration,
    /// `acceptAggregationPeriod` in seconds.
    pub aggregation_period: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            streamer_url: None,
            symbols: Vec::new(),
            channel: StreamingClientConfig::DEFAULT_CHANNEL,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(60),
            aggregation_period: 0.1,
        }
    }
}

/// REST client settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Minimum interval between calls.
    pub rate_limit_interval: Duration,
    /// Retry policy for idempotent calls.
    pub retry: RetryPolicy,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port for consumers, snapshots and health checks.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Brokerage environment.
    pub environment: Environment,
    /// REST base URL.
    pub base_url: String,
    /// Login credentials.
    pub credentials: Credentials,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// REST client settings.
    pub rest: RestSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Consumer delivery settings.
    pub broadcast: BroadcastConfig,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = var("TASTY_ENVIRONMENT")
            .map_or(Ok(Environment::default()), |s| Environment::parse(&s))?;

        let base_url = var("TASTY_BASE_URL")
            .unwrap_or_else(|| environment.base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let credentials = Credentials::new(
            var("TASTY_USERNAME"),
            var("TASTY_PASSWORD"),
            var("TASTY_SESSION_TOKEN"),
        );
        if credentials.session_token().is_none() {
            if credentials.username().is_none() {
                return Err(ConfigError::MissingEnvVar("TASTY_USERNAME".to_string()));
            }
            if credentials.password().is_none() {
                return Err(ConfigError::MissingEnvVar("TASTY_PASSWORD".to_string()));
            }
        }

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            streamer_url: var("TASTY_STREAMER_URL"),
            symbols: var("STREAM_SYMBOLS")
                .map(|s| parse_symbols(&s))
                .unwrap_or_default(),
            channel: parse_or("STREAM_CHANNEL", var("STREAM_CHANNEL"), defaults.channel)?,
            keepalive_interval: Duration::from_secs(parse_or(
                "STREAM_KEEPALIVE_INTERVAL_SECS",
                var("STREAM_KEEPALIVE_INTERVAL_SECS"),
                defaults.keepalive_interval.as_secs(),
            )?),
            keepalive_timeout: Duration::from_secs(parse_or(
                "STREAM_KEEPALIVE_TIMEOUT_SECS",
                var("STREAM_KEEPALIVE_TIMEOUT_SECS"),
                defaults.keepalive_timeout.as_secs(),
            )?),
            aggregation_period: parse_or(
                "STREAM_AGGREGATION_PERIOD_SECS",
                var("STREAM_AGGREGATION_PERIOD_SECS"),
                defaults.aggregation_period,
            )?,
        };
        if stream.keepalive_interval.is_zero() {
            return Err(invalid("STREAM_KEEPALIVE_INTERVAL_SECS", "0"));
        }
        if !stream.aggregation_period.is_finite() || stream.aggregation_period < 0.0 {
            return Err(invalid(
                "STREAM_AGGREGATION_PERIOD_SECS",
                &stream.aggregation_period.to_string(),
            ));
        }

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(parse_or(
                "RECONNECT_INITIAL_DELAY_MS",
                var("RECONNECT_INITIAL_DELAY_MS"),
                duration_millis(reconnect_defaults.initial_delay),
            )?),
            max_delay: Duration::from_secs(parse_or(
                "RECONNECT_MAX_DELAY_SECS",
                var("RECONNECT_MAX_DELAY_SECS"),
                reconnect_defaults.max_delay.as_secs(),
            )?),
            max_attempts: parse_or(
                "RECONNECT_MAX_ATTEMPTS",
                var("RECONNECT_MAX_ATTEMPTS"),
                reconnect_defaults.max_attempts,
            )?,
            reset_after: Duration::from_secs(parse_or(
                "RECONNECT_RESET_AFTER_SECS",
                var("RECONNECT_RESET_AFTER_SECS"),
                reconnect_defaults.reset_after.as_secs(),
            )?),
        };
        if reconnect.max_attempts == 0 {
            return Err(invalid("RECONNECT_MAX_ATTEMPTS", "0"));
        }

        let rest_defaults = RestSettings::default();
        let rest = RestSettings {
            rate_limit_interval: Duration::from_millis(parse_or(
                "RATE_LIMIT_INTERVAL_MS",
                var("RATE_LIMIT_INTERVAL_MS"),
                duration_millis(rest_defaults.rate_limit_interval),
            )?),
            retry: RetryPolicy::new(
                parse_or(
                    "REST_RETRY_MAX_ATTEMPTS",
                    var("REST_RETRY_MAX_ATTEMPTS"),
                    rest_defaults.retry.max_attempts,
                )?,
                Duration::from_millis(parse_or(
                    "REST_RETRY_BASE_DELAY_MS",
                    var("REST_RETRY_BASE_DELAY_MS"),
                    duration_millis(rest_defaults.retry.base_delay),
                )?),
                Duration::from_millis(parse_or(
                    "REST_RETRY_MAX_DELAY_MS",
                    var("REST_RETRY_MAX_DELAY_MS"),
                    duration_millis(rest_defaults.retry.max_delay),
                )?),
            ),
        };

        let server = ServerSettings {
            http_port: parse_or(
                "HTTP_PORT",
                var("HTTP_PORT"),
                ServerSettings::default().http_port,
            )?,
        };

        let broadcast = BroadcastConfig {
            write_timeout: Duration::from_millis(parse_or(
                "BROADCAST_WRITE_TIMEOUT_MS",
                var("BROADCAST_WRITE_TIMEOUT_MS"),
                duration_millis(BroadcastConfig::default().write_timeout),
            )?),
        };

        Ok(Self {
            environment,
            base_url,
            credentials,
            stream,
            reconnect,
            rest,
            server,
            broadcast,
        })
    }

    /// Session manager configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.base_url.clone());
        config.rate_limit_interval = self.rest.rate_limit_interval;
        config.retry = self.rest.retry;
        config
    }

    /// Streaming client configuration.
    #[must_use]
    pub fn streaming_config(&self) -> StreamingClientConfig {
        let endpoint = self
            .stream
            .streamer_url
            .clone()
            .map_or(StreamEndpoint::QuoteToken, StreamEndpoint::Fixed);

        let mut config = StreamingClientConfig::new(endpoint);
        config.channel = self.stream.channel;
        config.keepalive =
            KeepaliveConfig::new(self.stream.keepalive_interval, self.stream.keepalive_timeout);
        config.aggregation_period = self.stream.aggregation_period;
        config.reconnect = self.reconnect.clone();
        config
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable cannot be parsed or is out of range.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| {
        v.trim().parse().map_err(|_| invalid(key, &v))
    })
}

fn parse_symbols(s: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !symbols.iter().any(|existing| existing == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
