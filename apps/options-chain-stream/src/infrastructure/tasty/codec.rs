//! DXLink Codec
//!
//! Encodes client frames and decodes server frames, including the
//! `FEED_DATA` payload in both data formats.
//!
//! # COMPACT format
//!
//! Events are flattened into one array per category, preceded by the
//! category name. The record stride is the number of negotiated fields:
//!
//! ```json
//! ["Quote", ["Quote","AAPL",150.1,150.2,100,200, "Quote","MSFT",410.0,410.5,5,7]]
//! ```
//!
//! Several `category, values` pairs may follow each other in one payload.
//!
//! # FULL format
//!
//! An array of objects keyed by field name, each with `eventType`.
//!
//! Numeric fields accept numbers, `null` and the strings `"NaN"` /
//! `"Infinity"`; anything non-finite is treated as absent.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::messages::{ClientFrame, FeedConfigFrame, ServerFrame};
use crate::domain::market_data::{
    EventCategory, GreeksEvent, MarketDataEvent, QuoteEvent, SummaryEvent, TradeEvent,
};

/// Fields requested for `Quote` events.
pub const QUOTE_FIELDS: &[&str] = &[
    "eventType",
    "eventSymbol",
    "bidPrice",
    "askPrice",
    "bidSize",
    "askSize",
];

/// Fields requested for `Greeks` events.
pub const GREEKS_FIELDS: &[&str] = &[
    "eventType",
    "eventSymbol",
    "volatility",
    "delta",
    "gamma",
    "theta",
    "rho",
    "vega",
];

/// Fields requested for `Trade` events.
pub const TRADE_FIELDS: &[&str] = &["eventType", "eventSymbol", "price", "dayVolume", "size"];

/// Fields requested for `Summary` events.
pub const SUMMARY_FIELDS: &[&str] = &[
    "eventType",
    "eventSymbol",
    "openInterest",
    "dayOpenPrice",
    "dayHighPrice",
    "dayLowPrice",
    "prevDayClosePrice",
];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is missing or has the wrong type.
    #[error("missing field `{field}` in {category} event")]
    MissingField {
        /// Event category.
        category: EventCategory,
        /// Field name.
        field: &'static str,
    },

    /// Invalid `FEED_DATA` payload.
    #[error("invalid feed data: {0}")]
    InvalidFormat(String),
}

/// DXLink codec holding the negotiated field layout per category.
#[derive(Debug, Clone)]
pub struct DxLinkCodec {
    fields: HashMap<EventCategory, Vec<String>>,
}

impl Default for DxLinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DxLinkCodec {
    /// Create a codec with the default requested fields.
    #[must_use]
    pub fn new() -> Self {
        let fields = EventCategory::all()
            .iter()
            .map(|category| {
                let names = requested_fields(*category)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                (*category, names)
            })
            .collect();
        Self { fields }
    }

    /// Requested fields keyed by wire category name, for `FEED_SETUP`.
    #[must_use]
    pub fn accept_event_fields(&self) -> BTreeMap<String, Vec<String>> {
        EventCategory::all()
            .iter()
            .map(|category| {
                (
                    category.as_str().to_string(),
                    requested_fields(*category)
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                )
            })
            .collect()
    }

    /// Field layout currently used to decode a category.
    #[must_use]
    pub fn fields(&self, category: EventCategory) -> &[String] {
        self.fields.get(&category).map_or(&[], Vec::as_slice)
    }

    /// Restore the requested layout (on a new connection).
    pub fn reset_fields(&mut self) {
        *self = Self::new();
    }

    /// Adopt the layout returned by the server in `FEED_CONFIG`.
    pub fn apply_feed_config(&mut self, config: &FeedConfigFrame) {
        let Some(event_fields) = &config.event_fields else {
            return;
        };
        for (name, fields) in event_fields {
            match name.parse::<EventCategory>() {
                Ok(category) => {
                    tracing::debug!(%category, fields = ?fields, "Negotiated event fields");
                    self.fields.insert(category, fields.clone());
                }
                Err(e) => tracing::debug!(error = %e, "Ignoring fields for unrequested category"),
            }
        }
    }

    /// Encode a client frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, frame: &ClientFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Decode one server frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn decode(&self, text: &str) -> Result<ServerFrame, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a `FEED_DATA` payload into events stamped with `received_at`.
    ///
    /// Categories that were not requested are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload shape is invalid or a record lacks
    /// its symbol.
    pub fn decode_feed_data(
        &self,
        data: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<MarketDataEvent>, CodecError> {
        let Value::Array(items) = data else {
            return Err(CodecError::InvalidFormat("payload is not an array".to_string()));
        };

        match items.first() {
            None => Ok(Vec::new()),
            Some(Value::String(_)) => self.decode_compact(items, received_at),
            Some(Value::Object(_)) => decode_full(items, received_at),
            Some(other) => Err(CodecError::InvalidFormat(format!(
                "unexpected payload element: {other}"
            ))),
        }
    }

    fn decode_compact(
        &self,
        items: &[Value],
        received_at: DateTime<Utc>,
    ) -> Result<Vec<MarketDataEvent>, CodecError> {
        if items.len() % 2 != 0 {
            return Err(CodecError::InvalidFormat(
                "compact payload must be category/values pairs".to_string(),
            ));
        }

        let mut events = Vec::new();
        for pair in items.chunks_exact(2) {
            let (Value::String(name), Value::Array(values)) = (&pair[0], &pair[1]) else {
                return Err(CodecError::InvalidFormat(
                    "compact pair must be [string, array]".to_string(),
                ));
            };

            let Ok(category) = name.parse::<EventCategory>() else {
                tracing::debug!(event_type = %name, "Skipping unrequested event category");
                continue;
            };

            let fields = self.fields(category);
            if fields.is_empty() || values.len() % fields.len() != 0 {
                return Err(CodecError::InvalidFormat(format!(
                    "{category} values length {} is not a multiple of {} fields",
                    values.len(),
                    fields.len()
                )));
            }

            for record in values.chunks_exact(fields.len()) {
                let lookup = |field: &str| {
                    fields
                        .iter()
                        .position(|f| f == field)
                        .and_then(|i| record.get(i))
                };
                events.push(build_event(category, lookup, received_at)?);
            }
        }
        Ok(events)
    }
}

fn decode_full(
    items: &[Value],
    received_at: DateTime<Utc>,
) -> Result<Vec<MarketDataEvent>, CodecError> {
    let mut events = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(map) = item else {
            return Err(CodecError::InvalidFormat(
                "full payload element is not an object".to_string(),
            ));
        };
        let Some(name) = map.get("eventType").and_then(Value::as_str) else {
            return Err(CodecError::InvalidFormat("event without eventType".to_string()));
        };
        let Ok(category) = name.parse::<EventCategory>() else {
            tracing::debug!(event_type = %name, "Skipping unrequested event category");
            continue;
        };
        events.push(build_event(category, |field| map.get(field), received_at)?);
    }
    Ok(events)
}

const fn requested_fields(category: EventCategory) -> &'static [&'static str] {
    match category {
        EventCategory::Quote => QUOTE_FIELDS,
        EventCategory::Greeks => GREEKS_FIELDS,
        EventCategory::Trade => TRADE_FIELDS,
        EventCategory::Summary => SUMMARY_FIELDS,
    }
}

fn build_event<'a>(
    category: EventCategory,
    get: impl Fn(&str) -> Option<&'a Value>,
    timestamp: DateTime<Utc>,
) -> Result<MarketDataEvent, CodecError> {
    let symbol = get("eventSymbol")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(CodecError::MissingField {
            category,
            field: "eventSymbol",
        })?
        .to_string();

    let num = |field: &str| get(field).and_then(number).unwrap_or(0.0);
    let dec = |field: &str| get(field).and_then(decimal).unwrap_or_default();

    let event = match category {
        EventCategory::Quote => MarketDataEvent::Quote(QuoteEvent {
            symbol,
            timestamp,
            bid_price: dec("bidPrice"),
            ask_price: dec("askPrice"),
            bid_size: num("bidSize"),
            ask_size: num("askSize"),
        }),
        EventCategory::Greeks => MarketDataEvent::Greeks(GreeksEvent {
            symbol,
            timestamp,
            volatility: num("volatility"),
            delta: num("delta"),
            gamma: num("gamma"),
            theta: num("theta"),
            vega: num("vega"),
            rho: num("rho"),
        }),
        EventCategory::Trade => MarketDataEvent::Trade(TradeEvent {
            symbol,
            timestamp,
            price: dec("price"),
            day_volume: num("dayVolume"),
            size: num("size"),
        }),
        EventCategory::Summary => MarketDataEvent::Summary(SummaryEvent {
            symbol,
            timestamp,
            open_interest: num("openInterest"),
            day_open_price: dec("dayOpenPrice"),
            day_high_price: dec("dayHighPrice"),
            day_low_price: dec("dayLowPrice"),
            prev_day_close_price: dec("prevDayClosePrice"),
        }),
    };
    Ok(event)
}

/// Finite numeric value of a field.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Decimal value of a field, parsed from its textual form to avoid binary
/// float artifacts.
fn decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .or_else(|| number(value).and_then(|f| Decimal::try_from(f).ok()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::infrastructure::tasty::messages::FeedDataFrame;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn decodes_compact_quotes() {
        let codec = DxLinkCodec::new();
        let data = json!([
            "Quote",
            ["Quote", "AAPL", 150.1, 150.2, 100, 200, "Quote", "MSFT", 410.0, 410.5, 5, 7]
        ]);

        let events = codec.decode_feed_data(&data, Utc::now()).unwrap();

        assert_eq!(events.len(), 2);
        let MarketDataEvent::Quote(q) = &events[0] else {
            panic!("expected quote");
        };
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.bid_price, dec("150.1"));
        assert_eq!(q.ask_price, dec("150.2"));
        assert_eq!(q.ask_size, 200.0);
        assert_eq!(events[1].symbol(), "MSFT");
    }

    #[test]
    fn decodes_multiple_compact_categories() {
        let codec = DxLinkCodec::new();
        let data = json!([
            "Trade", ["Trade", "AAPL", 150.25, 1000, 10],
            "Greeks", ["Greeks", "AAPL", 0.25, 0.5, 0.05, -0.01, 0.02, 0.1]
        ]);

        let events = codec.decode_feed_data(&data, Utc::now()).unwrap();

        assert_eq!(events.len(), 2);
        let MarketDataEvent::Trade(t) = &events[0] else {
            panic!("expected trade");
        };
        assert_eq!(t.price, dec("150.25"));
        assert_eq!(t.day_volume, 1000.0);
        let MarketDataEvent::Greeks(g) = &events[1] else {
            panic!("expected greeks");
        };
        assert_eq!(g.delta, 0.5);
        assert_eq!(g.rho, 0.02);
        assert_eq!(g.vega, 0.1);
    }

    #[test_case(json!("NaN") ; "nan string")]
    #[test_case(json!(null) ; "null")]
    #[test_case(json!("Infinity") ; "infinity string")]
    fn non_finite_values_are_absent(value: Value) {
        let codec = DxLinkCodec::new();
        let data = json!(["Quote", ["Quote", "AAPL", value, 1.5, value, 3]]);

        let events = codec.decode_feed_data(&data, Utc::now()).unwrap();

        let MarketDataEvent::Quote(q) = &events[0] else {
            panic!("expected quote");
        };
        assert_eq!(q.bid_price, Decimal::ZERO);
        assert_eq!(q.bid_size, 0.0);
        assert_eq!(q.ask_price, dec("1.5"));
    }

    #[test]
    fn decodes_full_format() {
        let codec = DxLinkCodec::new();
        let data = json!([
            {"eventType": "Summary", "eventSymbol": "AAPL", "openInterest": 1234, "dayOpenPrice": 149.5},
            {"eventType": "Profile", "eventSymbol": "AAPL"}
        ]);

        let events = codec.decode_feed_data(&data, Utc::now()).unwrap();

        assert_eq!(events.len(), 1);
        let MarketDataEvent::Summary(s) = &events[0] else {
            panic!("expected summary");
        };
        assert_eq!(s.open_interest, 1234.0);
        assert_eq!(s.day_open_price, dec("149.5"));
        assert_eq!(s.day_low_price, Decimal::ZERO);
    }

    #[test]
    fn negotiated_fields_change_layout() {
        let mut codec = DxLinkCodec::new();
        let config = FeedConfigFrame {
            channel: 3,
            aggregation_period: Some(0.1),
            data_format: None,
            event_fields: Some(BTreeMap::from([(
                "Trade".to_string(),
                vec!["eventSymbol".to_string(), "price".to_string()],
            )])),
        };

        codec.apply_feed_config(&config);
        let events = codec
            .decode_feed_data(&json!(["Trade", ["AAPL", 10.5, "MSFT", 20.25]]), Utc::now())
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(codec.fields(EventCategory::Trade).len(), 2);
        let MarketDataEvent::Trade(t) = &events[1] else {
            panic!("expected trade");
        };
        assert_eq!(t.price, dec("20.25"));

        codec.reset_fields();
        assert_eq!(codec.fields(EventCategory::Trade).len(), TRADE_FIELDS.len());
    }

    #[test]
    fn unrequested_compact_category_is_skipped() {
        let codec = DxLinkCodec::new();
        let data = json!(["Profile", ["Profile", "AAPL", "x"], "Trade", ["Trade", "AAPL", 1, 2, 3]]);

        let events = codec.decode_feed_data(&data, Utc::now()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category(), EventCategory::Trade);
    }

    #[test_case(json!({"not": "array"}) ; "object payload")]
    #[test_case(json!(["Quote"]) ; "dangling category")]
    #[test_case(json!(["Quote", ["Quote", "AAPL", 1.0]]) ; "short record")]
    #[test_case(json!([42]) ; "number element")]
    #[test_case(json!(["Trade", ["Trade", null, 1, 2, 3]]) ; "missing symbol")]
    fn rejects_malformed_payloads(data: Value) {
        let codec = DxLinkCodec::new();
        assert!(codec.decode_feed_data(&data, Utc::now()).is_err());
    }

    #[test]
    fn empty_payload_yields_no_events() {
        let codec = DxLinkCodec::new();
        assert!(codec.decode_feed_data(&json!([]), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn events_carry_receive_time() {
        let codec = DxLinkCodec::new();
        let at = Utc::now();
        let events = codec
            .decode_feed_data(&json!(["Trade", ["Trade", "AAPL", 1, 2, 3]]), at)
            .unwrap();
        assert_eq!(events[0].timestamp(), at);
    }

    #[test]
    fn accept_event_fields_covers_all_categories() {
        let fields = DxLinkCodec::new().accept_event_fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields["Quote"], QUOTE_FIELDS);
        assert_eq!(fields["Summary"][2], "openInterest");
    }

    #[test]
    fn decodes_feed_data_frame() {
        let codec = DxLinkCodec::new();
        let frame = codec
            .decode(r#"{"type":"FEED_DATA","channel":3,"data":["Trade",["Trade","AAPL",150.25,1000,10]]}"#)
            .unwrap();

        let ServerFrame::FeedData(FeedDataFrame { channel, data }) = frame else {
            panic!("expected FEED_DATA");
        };
        assert_eq!(channel, 3);
        assert_eq!(codec.decode_feed_data(&data, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn encode_produces_wire_json() {
        let codec = DxLinkCodec::new();
        let text = codec.encode(&ClientFrame::keepalive()).unwrap();
        assert_eq!(text, r#"{"type":"KEEPALIVE","channel":0}"#);
    }
}
