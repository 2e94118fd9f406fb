//! DXLink Wire Frames
//!
//! JSON frames exchanged with the DXLink streamer. Every frame carries the
//! `{type, channel}` envelope; field names below are the wire contract.
//!
//! # Client Frames
//!
//! - `SETUP` (channel 0): protocol version and keepalive timeouts
//! - `AUTH` (channel 0): session or quote token
//! - `CHANNEL_REQUEST`: opens the feed channel (`service: "FEED"`)
//! - `FEED_SETUP`: data format and per-category accepted fields
//! - `FEED_SUBSCRIPTION`: add/remove `{type, symbol}` entries, optional reset
//! - `KEEPALIVE` (channel 0)
//!
//! # Server Frames
//!
//! - `SETUP`, `AUTH_STATE`, `CHANNEL_OPENED`, `CHANNEL_CLOSED`,
//!   `FEED_CONFIG`, `FEED_DATA`, `KEEPALIVE`, `ERROR`
//! - Any other type decodes as [`ServerFrame::Unknown`]
//!
//! # Example (JSON)
//!
//! ```json
//! {"type":"FEED_SUBSCRIPTION","channel":3,"reset":true,"add":[{"type":"Quote","symbol":"AAPL"}]}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::subscription::Subscription;

/// Protocol version announced in `SETUP`.
pub const PROTOCOL_VERSION: &str = "0.1-DXF-JS/0.3.0";

/// Channel used for connection-level frames.
pub const CONTROL_CHANNEL: u32 = 0;

/// Service requested for market data channels.
pub const FEED_SERVICE: &str = "FEED";

// =============================================================================
// Client Frames
// =============================================================================

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    /// Connection setup.
    Setup(SetupFrame),
    /// Authorization.
    Auth(AuthFrame),
    /// Open a logical channel.
    ChannelRequest(ChannelRequestFrame),
    /// Configure the feed channel.
    FeedSetup(FeedSetupFrame),
    /// Change the feed subscription.
    FeedSubscription(FeedSubscriptionFrame),
    /// Liveness.
    Keepalive(KeepaliveFrame),
}

impl ClientFrame {
    /// `SETUP` declaring the same keepalive timeout in both directions.
    #[must_use]
    pub fn setup(keepalive_timeout_secs: u64) -> Self {
        Self::Setup(SetupFrame {
            channel: CONTROL_CHANNEL,
            version: PROTOCOL_VERSION.to_string(),
            keepalive_timeout: keepalive_timeout_secs,
            accept_keepalive_timeout: keepalive_timeout_secs,
        })
    }

    /// `AUTH` carrying a token.
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth(AuthFrame {
            channel: CONTROL_CHANNEL,
            token: token.into(),
        })
    }

    /// `CHANNEL_REQUEST` for the feed service with automatic contract
    /// resolution.
    #[must_use]
    pub fn channel_request(channel: u32) -> Self {
        Self::ChannelRequest(ChannelRequestFrame {
            channel,
            service: FEED_SERVICE.to_string(),
            parameters: ChannelParameters {
                contract: ContractType::Auto,
            },
        })
    }

    /// `FEED_SETUP` requesting compact data with the given fields.
    #[must_use]
    pub const fn feed_setup(
        channel: u32,
        aggregation_period: f64,
        event_fields: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self::FeedSetup(FeedSetupFrame {
            channel,
            accept_aggregation_period: aggregation_period,
            accept_data_format: DataFormat::Compact,
            accept_event_fields: event_fields,
        })
    }

    /// `FEED_SUBSCRIPTION`.
    #[must_use]
    pub const fn subscription(
        channel: u32,
        reset: bool,
        add: Vec<Subscription>,
        remove: Vec<Subscription>,
    ) -> Self {
        Self::FeedSubscription(FeedSubscriptionFrame {
            channel,
            reset,
            add,
            remove,
        })
    }

    /// `KEEPALIVE` on the control channel.
    #[must_use]
    pub const fn keepalive() -> Self {
        Self::Keepalive(KeepaliveFrame {
            channel: CONTROL_CHANNEL,
        })
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "SETUP",
            Self::Auth(_) => "AUTH",
            Self::ChannelRequest(_) => "CHANNEL_REQUEST",
            Self::FeedSetup(_) => "FEED_SETUP",
            Self::FeedSubscription(_) => "FEED_SUBSCRIPTION",
            Self::Keepalive(_) => "KEEPALIVE",
        }
    }
}

/// `SETUP` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupFrame {
    /// Channel (always 0).
    pub channel: u32,
    /// Protocol version.
    pub version: String,
    /// Keepalive timeout the client promises, in seconds.
    pub keepalive_timeout: u64,
    /// Keepalive timeout the client accepts from the server, in seconds.
    pub accept_keepalive_timeout: u64,
}

/// `AUTH` frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    /// Channel (always 0).
    pub channel: u32,
    /// Session or quote token.
    pub token: String,
}

impl fmt::Debug for AuthFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFrame")
            .field("channel", &self.channel)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Contract resolution mode for a feed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    /// Server picks the contract.
    Auto,
    /// Ticker contract.
    Ticker,
    /// Stream contract.
    Stream,
    /// History contract.
    History,
}

/// `CHANNEL_REQUEST` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Contract resolution mode.
    pub contract: ContractType,
}

/// `CHANNEL_REQUEST` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequestFrame {
    /// Channel to open.
    pub channel: u32,
    /// Service name.
    pub service: String,
    /// Channel parameters.
    pub parameters: ChannelParameters,
}

/// Feed data encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFormat {
    /// Flat value arrays.
    Compact,
    /// One object per event.
    Full,
}

/// `FEED_SETUP` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSetupFrame {
    /// Feed channel.
    pub channel: u32,
    /// Aggregation period in seconds.
    pub accept_aggregation_period: f64,
    /// Requested data format.
    pub accept_data_format: DataFormat,
    /// Requested fields per event category.
    pub accept_event_fields: BTreeMap<String, Vec<String>>,
}

/// `FEED_SUBSCRIPTION` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscriptionFrame {
    /// Feed channel.
    pub channel: u32,
    /// Discard prior subscription state before applying `add`.
    #[serde(default)]
    pub reset: bool,
    /// Subscriptions to add.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<Subscription>,
    /// Subscriptions to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<Subscription>,
}

/// `KEEPALIVE` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveFrame {
    /// Channel (always 0).
    pub channel: u32,
}

// =============================================================================
// Server Frames
// =============================================================================

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    /// Server setup.
    Setup(ServerSetupFrame),
    /// Authorization state change.
    AuthState(AuthStateFrame),
    /// Channel opened.
    ChannelOpened(ChannelStatusFrame),
    /// Channel closed by the server.
    ChannelClosed(ChannelStatusFrame),
    /// Negotiated feed configuration.
    FeedConfig(FeedConfigFrame),
    /// Market data.
    FeedData(FeedDataFrame),
    /// Liveness.
    Keepalive(KeepaliveFrame),
    /// Error report.
    Error(ErrorFrame),
    /// Any other frame type.
    #[serde(other)]
    Unknown,
}

/// Server `SETUP` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSetupFrame {
    /// Channel.
    #[serde(default)]
    pub channel: u32,
    /// Server protocol version.
    #[serde(default)]
    pub version: Option<String>,
    /// Server keepalive timeout in seconds.
    #[serde(default)]
    pub keepalive_timeout: Option<u64>,
    /// Keepalive timeout the server accepts, in seconds.
    #[serde(default)]
    pub accept_keepalive_timeout: Option<u64>,
}

/// Authorization state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    /// Token accepted.
    Authorized,
    /// Token missing, rejected or expired.
    Unauthorized,
}

/// `AUTH_STATE` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthStateFrame {
    /// Channel.
    #[serde(default)]
    pub channel: u32,
    /// Authorization state.
    pub state: AuthStatus,
}

/// `CHANNEL_OPENED` / `CHANNEL_CLOSED` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelStatusFrame {
    /// Channel.
    pub channel: u32,
    /// Service name.
    #[serde(default)]
    pub service: Option<String>,
}

/// `FEED_CONFIG` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfigFrame {
    /// Channel.
    pub channel: u32,
    /// Effective aggregation period.
    #[serde(default)]
    pub aggregation_period: Option<f64>,
    /// Effective data format.
    #[serde(default)]
    pub data_format: Option<DataFormat>,
    /// Effective fields per event category.
    #[serde(default)]
    pub event_fields: Option<BTreeMap<String, Vec<String>>>,
}

/// `FEED_DATA` frame. The payload shape depends on the data format and is
/// decoded by the codec.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedDataFrame {
    /// Channel.
    pub channel: u32,
    /// Raw payload.
    pub data: serde_json::Value,
}

/// `ERROR` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Channel.
    #[serde(default)]
    pub channel: u32,
    /// Error code, e.g. `UNAUTHORIZED`.
    #[serde(default)]
    pub error: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl ErrorFrame {
    /// Whether the error reports a rejected or expired token.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self.error.as_str(), "UNAUTHORIZED" | "INVALID_TOKEN")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::market_data::EventCategory;
    use crate::domain::subscription::SubscriptionSet;

    #[test]
    fn setup_wire_shape() {
        let json = serde_json::to_value(ClientFrame::setup(60)).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "SETUP",
                "channel": 0,
                "version": "0.1-DXF-JS/0.3.0",
                "keepaliveTimeout": 60,
                "acceptKeepaliveTimeout": 60
            })
        );
    }

    #[test]
    fn auth_wire_shape_and_redaction() {
        let frame = ClientFrame::auth("secret-token");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({"type": "AUTH", "channel": 0, "token": "secret-token"}));
        assert!(!format!("{frame:?}").contains("secret-token"));
    }

    #[test]
    fn channel_request_wire_shape() {
        let json = serde_json::to_value(ClientFrame::channel_request(3)).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "CHANNEL_REQUEST",
                "channel": 3,
                "service": "FEED",
                "parameters": {"contract": "AUTO"}
            })
        );
    }

    #[test]
    fn feed_setup_wire_shape() {
        let fields = BTreeMap::from([(
            "Trade".to_string(),
            vec!["eventType".to_string(), "eventSymbol".to_string(), "price".to_string()],
        )]);
        let json = serde_json::to_value(ClientFrame::feed_setup(3, 0.1, fields)).unwrap();
        assert_eq!(json["type"], "FEED_SETUP");
        assert_eq!(json["acceptAggregationPeriod"], 0.1);
        assert_eq!(json["acceptDataFormat"], "COMPACT");
        assert_eq!(json["acceptEventFields"]["Trade"][2], "price");
    }

    #[test]
    fn keepalive_wire_shape() {
        let json = serde_json::to_value(ClientFrame::keepalive()).unwrap();
        assert_eq!(json, json!({"type": "KEEPALIVE", "channel": 0}));
    }

    #[test]
    fn subscription_round_trip_preserves_order() {
        let set: SubscriptionSet = [
            Subscription::new(EventCategory::Trade, "MSFT"),
            Subscription::new(EventCategory::Quote, "AAPL"),
            Subscription::new(EventCategory::Greeks, ".AAPL250117C150"),
        ]
        .into_iter()
        .collect();

        let frame = ClientFrame::subscription(3, true, set.to_vec(), vec![]);
        let text = serde_json::to_string(&frame).unwrap();
        let decoded: ClientFrame = serde_json::from_str(&text).unwrap();

        let ClientFrame::FeedSubscription(sub) = decoded else {
            panic!("expected FEED_SUBSCRIPTION");
        };
        assert!(sub.reset);
        assert!(sub.remove.is_empty());
        assert_eq!(sub.add.into_iter().collect::<SubscriptionSet>(), set);
    }

    #[test]
    fn empty_lists_are_omitted() {
        let frame = ClientFrame::subscription(
            3,
            false,
            vec![],
            vec![Subscription::new(EventCategory::Quote, "AAPL")],
        );
        let json = serde_json::to_value(frame).unwrap();
        assert!(json.get("add").is_none());
        assert_eq!(json["remove"][0]["symbol"], "AAPL");
        assert_eq!(json["reset"], false);
    }

    #[test]
    fn decodes_server_frames() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"AUTH_STATE","channel":0,"state":"AUTHORIZED","userId":"x"}"#)
                .unwrap();
        assert_eq!(
            frame,
            ServerFrame::AuthState(AuthStateFrame {
                channel: 0,
                state: AuthStatus::Authorized
            })
        );

        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"CHANNEL_OPENED","channel":3,"service":"FEED","parameters":{}}"#)
                .unwrap();
        assert!(matches!(frame, ServerFrame::ChannelOpened(ChannelStatusFrame { channel: 3, .. })));

        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"FEED_CONFIG","channel":3,"dataFormat":"COMPACT","aggregationPeriod":0.1,"eventFields":{"Quote":["eventType","eventSymbol"]}}"#,
        )
        .unwrap();
        let ServerFrame::FeedConfig(config) = frame else {
            panic!("expected FEED_CONFIG");
        };
        assert_eq!(config.data_format, Some(DataFormat::Compact));
        assert_eq!(config.event_fields.unwrap()["Quote"].len(), 2);
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"SOMETHING_NEW","channel":0}"#).unwrap();
        assert_eq!(frame, ServerFrame::Unknown);
    }

    #[test]
    fn error_frame_auth_classification() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"ERROR","channel":0,"error":"UNAUTHORIZED","message":"bad token"}"#)
                .unwrap();
        let ServerFrame::Error(error) = frame else {
            panic!("expected ERROR");
        };
        assert!(error.is_auth_error());

        let other = ErrorFrame {
            channel: 0,
            error: "TIMEOUT".to_string(),
            message: String::new(),
        };
        assert!(!other.is_auth_error());
    }
}
