//! Subscription Types
//!
//! The stored subscription set is the desired state of the feed channel. It
//! is replayed verbatim after every reconnect and only shrinks through an
//! explicit unsubscribe.
//!
//! # Design
//!
//! - A [`Subscription`] is an (event category, instrument symbol) pair.
//! - [`SubscriptionSet`] preserves insertion order so the replayed
//!   `FEED_SUBSCRIPTION` frame is identical across reconnects.
//! - `extend` and `remove` report exactly what changed, which lets the
//!   streaming client send incremental frames while live.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::market_data::EventCategory;

// =============================================================================
// Subscription
// =============================================================================

/// One (event category, symbol) pair. Serializes as the DXLink
/// `{type, symbol}` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Event category.
    #[serde(rename = "type")]
    pub event_type: EventCategory,
    /// Instrument symbol.
    pub symbol: String,
}

impl Subscription {
    /// Create a subscription.
    #[must_use]
    pub fn new(event_type: EventCategory, symbol: impl Into<String>) -> Self {
        Self {
            event_type,
            symbol: symbol.into(),
        }
    }

    /// Subscriptions for every `(category, symbol)` combination, symbol-major.
    #[must_use]
    pub fn for_symbols<S: AsRef<str>>(symbols: &[S], categories: &[EventCategory]) -> Vec<Self> {
        symbols
            .iter()
            .flat_map(|symbol| {
                categories
                    .iter()
                    .map(move |category| Self::new(*category, symbol.as_ref()))
            })
            .collect()
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Insertion-ordered set of subscriptions.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct SubscriptionSet {
    entries: IndexSet<Subscription>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add subscriptions, keeping first-insertion order.
    ///
    /// Returns the subscriptions that were not already present.
    pub fn extend(&mut self, subs: impl IntoIterator<Item = Subscription>) -> Vec<Subscription> {
        let mut added = Vec::new();
        for sub in subs {
            if self.entries.insert(sub.clone()) {
                added.push(sub);
            }
        }
        added
    }

    /// Remove subscriptions, keeping the order of the rest.
    ///
    /// Returns the subscriptions that were present.
    pub fn remove(&mut self, subs: impl IntoIterator<Item = Subscription>) -> Vec<Subscription> {
        subs.into_iter()
            .filter_map(|sub| self.entries.shift_take(&sub))
            .collect()
    }

    /// Whether the set contains a subscription.
    #[must_use]
    pub fn contains(&self, sub: &Subscription) -> bool {
        self.entries.contains(sub)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy out the subscriptions in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Subscription> {
        self.entries.iter().cloned().collect()
    }
}

impl FromIterator<Subscription> for SubscriptionSet {
    fn from_iter<T: IntoIterator<Item = Subscription>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

// Order-sensitive, unlike `IndexSet` equality.
impl PartialEq for SubscriptionSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for SubscriptionSet {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str) -> Subscription {
        Subscription::new(EventCategory::Quote, symbol)
    }

    #[test]
    fn extend_preserves_insertion_order() {
        let mut set = SubscriptionSet::new();
        set.extend([quote("MSFT"), quote("AAPL"), quote("GOOG")]);

        let symbols: Vec<_> = set.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL", "GOOG"]);
    }

    #[test]
    fn extend_reports_only_new_entries() {
        let mut set = SubscriptionSet::new();
        set.extend([quote("AAPL")]);

        let added = set.extend([quote("AAPL"), quote("MSFT")]);

        assert_eq!(added, vec![quote("MSFT")]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn duplicate_reinsert_keeps_original_position() {
        let mut set = SubscriptionSet::new();
        set.extend([quote("AAPL"), quote("MSFT")]);
        set.extend([quote("AAPL")]);

        assert_eq!(set.to_vec(), vec![quote("AAPL"), quote("MSFT")]);
    }

    #[test]
    fn remove_reports_present_entries() {
        let mut set = SubscriptionSet::new();
        set.extend([quote("AAPL"), quote("MSFT"), quote("GOOG")]);

        let removed = set.remove([quote("MSFT"), quote("TSLA")]);

        assert_eq!(removed, vec![quote("MSFT")]);
        assert_eq!(set.to_vec(), vec![quote("AAPL"), quote("GOOG")]);
        assert!(!set.contains(&quote("MSFT")));
    }

    #[test]
    fn remove_from_empty_set_is_noop() {
        let mut set = SubscriptionSet::new();
        assert!(set.remove([quote("AAPL")]).is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn same_symbol_different_category_are_distinct() {
        let mut set = SubscriptionSet::new();
        set.extend([
            quote("AAPL"),
            Subscription::new(EventCategory::Greeks, "AAPL"),
        ]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn for_symbols_is_symbol_major() {
        let subs = Subscription::for_symbols(
            &["AAPL", "MSFT"],
            &[EventCategory::Quote, EventCategory::Trade],
        );
        assert_eq!(
            subs,
            vec![
                quote("AAPL"),
                Subscription::new(EventCategory::Trade, "AAPL"),
                quote("MSFT"),
                Subscription::new(EventCategory::Trade, "MSFT"),
            ]
        );
    }

    #[test]
    fn equality_is_order_sensitive() {
        let forward: SubscriptionSet = [quote("AAPL"), quote("MSFT")].into_iter().collect();
        let backward: SubscriptionSet = [quote("MSFT"), quote("AAPL")].into_iter().collect();

        assert_ne!(forward, backward);
        assert_eq!(forward, forward.clone());
    }

    #[test]
    fn removal_keeps_remaining_order_for_replay() {
        let mut set: SubscriptionSet = ["A", "B", "C", "D"].into_iter().map(quote).collect();
        set.remove([quote("B")]);
        set.extend([quote("B")]);

        let json = serde_json::to_value(&set).unwrap();
        let symbols: Vec<_> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["symbol"].as_str().unwrap())
            .collect();
        assert_eq!(symbols, vec!["A", "C", "D", "B"]);
    }

    #[test]
    fn subscription_serializes_as_wire_entry() {
        let json = serde_json::to_value(quote("AAPL")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Quote", "symbol": "AAPL"}));
    }
}
