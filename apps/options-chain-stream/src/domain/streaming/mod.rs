//! Streaming Connection States
//!
//! Lifecycle of a single streaming connection, from transport open through
//! the DXLink handshake to steady-state streaming.
//!
//! ```text
//! Disconnected → Connecting → AwaitingSetupAck → Authenticating → ChannelOpening
//!      ↑                                                                │
//!      │            Reconnecting ← (error) ← Streaming ← Subscribed ← FeedConfiguring
//!      └──────────────────┘
//! ```

use serde::Serialize;

/// State of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport open.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// SETUP sent.
    AwaitingSetupAck,
    /// AUTH sent.
    Authenticating,
    /// CHANNEL_REQUEST sent.
    ChannelOpening,
    /// FEED_SETUP sent.
    FeedConfiguring,
    /// FEED_SUBSCRIPTION sent.
    Subscribed,
    /// Read loop running.
    Streaming,
    /// Waiting out a backoff delay after a failure.
    Reconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingSetupAck => "awaiting_setup_ack",
            Self::Authenticating => "authenticating",
            Self::ChannelOpening => "channel_opening",
            Self::FeedConfiguring => "feed_configuring",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether frames are flowing on an established connection.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Whether a transport is currently open (handshake or streaming).
    #[must_use]
    pub const fn has_transport(&self) -> bool {
        !matches!(
            self,
            Self::Disconnected | Self::Connecting | Self::Reconnecting
        )
    }

    /// Numeric code for gauges.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::AwaitingSetupAck => 2,
            Self::Authenticating => 3,
            Self::ChannelOpening => 4,
            Self::FeedConfiguring => 5,
            Self::Subscribed => 6,
            Self::Streaming => 7,
            Self::Reconnecting => 8,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn transport_states() {
        assert!(!ConnectionState::Disconnected.has_transport());
        assert!(!ConnectionState::Reconnecting.has_transport());
        assert!(ConnectionState::Authenticating.has_transport());
        assert!(ConnectionState::Streaming.has_transport());
        assert!(ConnectionState::Streaming.is_streaming());
        assert!(!ConnectionState::Subscribed.is_streaming());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::AwaitingSetupAck).unwrap();
        assert_eq!(json, "\"awaiting_setup_ack\"");
    }
}
