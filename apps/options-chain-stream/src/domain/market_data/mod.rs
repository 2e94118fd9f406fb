//! Market Data Types
//!
//! Canonical internal representation of the DXLink event categories and of
//! the option-chain snapshot synthesized from them. These types are
//! codec-agnostic; the wire mapping lives in the infrastructure layer.
//!
//! # Event Categories
//!
//! | Category | Payload |
//! |----------|---------|
//! | `Quote`  | bid/ask price and size |
//! | `Greeks` | volatility, delta, gamma, theta, vega, rho |
//! | `Trade`  | last price, day volume, last size |
//! | `Summary`| open interest, day OHLC reference prices |

mod symbol;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use symbol::ContractIdentity;

// =============================================================================
// Event Category
// =============================================================================

/// DXLink event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventCategory {
    /// Best bid/ask.
    Quote,
    /// Option sensitivities.
    Greeks,
    /// Last sale.
    Trade,
    /// Daily summary (open interest).
    Summary,
}

impl EventCategory {
    /// All categories, in subscription order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Quote, Self::Greeks, Self::Trade, Self::Summary]
    }

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Greeks => "Greeks",
            Self::Trade => "Trade",
            Self::Summary => "Summary",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name an event category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Quote" => Ok(Self::Quote),
            "Greeks" => Ok(Self::Greeks),
            "Trade" => Ok(Self::Trade),
            "Summary" => Ok(Self::Summary),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Latest best bid/ask for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// Time the event was received.
    pub timestamp: DateTime<Utc>,
    /// Best bid price.
    pub bid_price: Decimal,
    /// Best ask price.
    pub ask_price: Decimal,
    /// Size at the bid.
    pub bid_size: f64,
    /// Size at the ask.
    pub ask_size: f64,
}

/// Latest option sensitivities for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct GreeksEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// Time the event was received.
    pub timestamp: DateTime<Utc>,
    /// Implied volatility.
    pub volatility: f64,
    /// Delta.
    pub delta: f64,
    /// Gamma.
    pub gamma: f64,
    /// Theta.
    pub theta: f64,
    /// Vega.
    pub vega: f64,
    /// Rho.
    pub rho: f64,
}

/// Latest sale for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// Time the event was received.
    pub timestamp: DateTime<Utc>,
    /// Last sale price.
    pub price: Decimal,
    /// Cumulative volume for the day.
    pub day_volume: f64,
    /// Size of the last sale.
    pub size: f64,
}

/// Daily summary for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// Time the event was received.
    pub timestamp: DateTime<Utc>,
    /// Open interest.
    pub open_interest: f64,
    /// Day open price.
    pub day_open_price: Decimal,
    /// Day high price.
    pub day_high_price: Decimal,
    /// Day low price.
    pub day_low_price: Decimal,
    /// Previous day close price.
    pub prev_day_close_price: Decimal,
}

/// A decoded market data event. Immutable once constructed; a newer event
/// of the same category and symbol supersedes it.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketDataEvent {
    /// Quote event.
    Quote(QuoteEvent),
    /// Greeks event.
    Greeks(GreeksEvent),
    /// Trade event.
    Trade(TradeEvent),
    /// Summary event.
    Summary(SummaryEvent),
}

impl MarketDataEvent {
    /// Instrument symbol the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(e) => &e.symbol,
            Self::Greeks(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Summary(e) => &e.symbol,
        }
    }

    /// Category of the event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Quote(_) => EventCategory::Quote,
            Self::Greeks(_) => EventCategory::Greeks,
            Self::Trade(_) => EventCategory::Trade,
            Self::Summary(_) => EventCategory::Summary,
        }
    }

    /// Time the event was received.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Quote(e) => e.timestamp,
            Self::Greeks(e) => e.timestamp,
            Self::Trade(e) => e.timestamp,
            Self::Summary(e) => e.timestamp,
        }
    }
}

// =============================================================================
// Option Chain Snapshot
// =============================================================================

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

/// One contract entry of a snapshot.
///
/// All-zero market fields mean "not yet observed", never a quote of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContract {
    /// Strike price (zero when the symbol carries no contract identity).
    pub strike: Decimal,
    /// Expiration date.
    pub expiration: Option<NaiveDate>,
    /// Option right.
    #[serde(rename = "type")]
    pub option_type: Option<OptionType>,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Last sale price.
    pub last_price: Decimal,
    /// Day volume.
    pub volume: u64,
    /// Open interest.
    pub open_interest: u64,
    /// Delta.
    pub delta: f64,
    /// Gamma.
    pub gamma: f64,
    /// Theta.
    pub theta: f64,
    /// Vega.
    pub vega: f64,
    /// Rho.
    pub rho: f64,
    /// Implied volatility.
    pub implied_volatility: f64,
}

impl OptionContract {
    /// Whether any market field has been observed.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        !self.bid.is_zero()
            || !self.ask.is_zero()
            || !self.last_price.is_zero()
            || self.volume != 0
            || self.open_interest != 0
            || self.delta != 0.0
            || self.gamma != 0.0
            || self.theta != 0.0
            || self.vega != 0.0
            || self.rho != 0.0
            || self.implied_volatility != 0.0
    }
}

/// Point-in-time aggregate view of one instrument symbol.
///
/// A pure projection of the aggregation cache; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSnapshot {
    /// Instrument symbol.
    pub symbol: String,
    /// Latest trade price for the symbol.
    pub underlying_price: Decimal,
    /// Timestamp of the freshest constituent event.
    #[serde(rename = "lastUpdated")]
    pub updated: DateTime<Utc>,
    /// Call contracts.
    pub calls: Vec<OptionContract>,
    /// Put contracts.
    pub puts: Vec<OptionContract>,
}

impl OptionSnapshot {
    /// Iterate over calls then puts.
    pub fn contracts(&self) -> impl Iterator<Item = &OptionContract> {
        self.calls.iter().chain(self.puts.iter())
    }
}
