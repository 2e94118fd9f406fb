//! Event Aggregator
//!
//! Keeps the latest event of each category per symbol and synthesizes
//! [`OptionSnapshot`]s on demand.
//!
//! # Cache
//!
//! Four maps (Quote, Greeks, Trade, Summary) keyed by symbol, last write
//! wins. The cache outlives reconnects, so a consumer never sees a snapshot
//! reset to zero just because the transport dropped.
//!
//! # Locking
//!
//! A single reader/writer lock covers all four maps: concurrent `snapshot`
//! calls share the read side, `handle_event` takes the write side.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::SnapshotProvider;
use crate::domain::market_data::{
    ContractIdentity, GreeksEvent, MarketDataEvent, OptionContract, OptionSnapshot, OptionType,
    QuoteEvent, SummaryEvent, TradeEvent,
};

#[derive(Debug, Default)]
struct AggregationCache {
    quotes: HashMap<String, QuoteEvent>,
    greeks: HashMap<String, GreeksEvent>,
    trades: HashMap<String, TradeEvent>,
    summaries: HashMap<String, SummaryEvent>,
}

/// Per-symbol latest-event cache.
#[derive(Debug, Default)]
pub struct EventAggregator {
    cache: RwLock<AggregationCache>,
}

impl EventAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an event into its category cache.
    pub fn handle_event(&self, event: MarketDataEvent) {
        let mut cache = self.cache.write();
        match event {
            MarketDataEvent::Quote(e) => {
                cache.quotes.insert(e.symbol.clone(), e);
            }
            MarketDataEvent::Greeks(e) => {
                cache.greeks.insert(e.symbol.clone(), e);
            }
            MarketDataEvent::Trade(e) => {
                cache.trades.insert(e.symbol.clone(), e);
            }
            MarketDataEvent::Summary(e) => {
                cache.summaries.insert(e.symbol.clone(), e);
            }
        }
    }

    /// Synthesize the snapshot for `symbol`.
    ///
    /// Categories never observed contribute zero values. The single contract
    /// entry lands in `calls` only when the symbol parses as a call; every
    /// other symbol lands in `puts`.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> OptionSnapshot {
        let cache = self.cache.read();
        let quote = cache.quotes.get(symbol);
        let greeks = cache.greeks.get(symbol);
        let trade = cache.trades.get(symbol);
        let summary = cache.summaries.get(symbol);

        let updated = [
            quote.map(|e| e.timestamp),
            greeks.map(|e| e.timestamp),
            trade.map(|e| e.timestamp),
            summary.map(|e| e.timestamp),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let identity = ContractIdentity::parse(symbol);
        let contract = OptionContract {
            strike: identity.as_ref().map_or(Decimal::ZERO, |id| id.strike),
            expiration: identity.as_ref().map(|id| id.expiration),
            option_type: identity.as_ref().map(|id| id.option_type),
            bid: quote.map_or(Decimal::ZERO, |q| q.bid_price),
            ask: quote.map_or(Decimal::ZERO, |q| q.ask_price),
            last_price: trade.map_or(Decimal::ZERO, |t| t.price),
            volume: trade.map_or(0, |t| whole_units(t.day_volume)),
            open_interest: summary.map_or(0, |s| whole_units(s.open_interest)),
            delta: greeks.map_or(0.0, |g| g.delta),
            gamma: greeks.map_or(0.0, |g| g.gamma),
            theta: greeks.map_or(0.0, |g| g.theta),
            vega: greeks.map_or(0.0, |g| g.vega),
            rho: greeks.map_or(0.0, |g| g.rho),
            implied_volatility: greeks.map_or(0.0, |g| g.volatility),
        };

        let (calls, puts) = if contract.option_type == Some(OptionType::Call) {
            (vec![contract], Vec::new())
        } else {
            (Vec::new(), vec![contract])
        };

        OptionSnapshot {
            symbol: symbol.to_string(),
            underlying_price: trade.map_or(Decimal::ZERO, |t| t.price),
            updated,
            calls,
            puts,
        }
    }

    /// Symbols with at least one cached event, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let cache = self.cache.read();
        cache
            .quotes
            .keys()
            .chain(cache.greeks.keys())
            .chain(cache.trades.keys())
            .chain(cache.summaries.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of distinct cached symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols().len()
    }
}

impl SnapshotProvider for EventAggregator {
    fn snapshot(&self, symbol: &str) -> OptionSnapshot {
        Self::snapshot(self, symbol)
    }

    fn symbols(&self) -> Vec<String> {
        Self::symbols(self)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_units(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.trunc() as u64
    } else {
        0
    }
}

// =============================================================================
// Tests
// =============================================================================
