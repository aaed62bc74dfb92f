//! Canonical depth record and the small value types it's built from.

use serde::{Deserialize, Serialize};

/// One exchange endpoint this crate knows how to speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Huobi,
    OkEx,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Huobi => "huobi",
            Venue::OkEx => "okex",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument kind a caller asked to subscribe to. Only `Spot` produces a
/// non-empty subscribe frame in v1 (see `Handler::format_subscribe`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Spot,
    Futures,
    Perpetual,
    Option,
}

/// A caller's request to subscribe to one symbol's depth channel on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub symbol: String,
    pub venue: Venue,
    pub market_kind: MarketKind,
}

impl SubscribeRequest {
    pub fn new(symbol: impl Into<String>, venue: Venue, market_kind: MarketKind) -> Self {
        Self {
            symbol: symbol.into(),
            venue,
            market_kind,
        }
    }
}

/// One (price, size) level, both preserved as the exchange delivered or
/// formatted them — never renormalized.
pub type Level = (String, String);

/// One canonical depth snapshot for a `(venue, symbol)` at a point in time.
///
/// Invariant: once a `Quote` is handed to `Lister::add` or `MarketPool::push`,
/// `bids`/`asks` are non-empty and `best_bid == bids[0].0`,
/// `best_ask == asks[0].0`. Callers that build a `Quote` by hand (tests,
/// venue decoders) should go through `Quote::new`, which enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub venue: Venue,
    pub symbol: String,
    pub best_bid: String,
    pub best_ask: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub timestamp_ms: i64,
}

impl Quote {
    /// Builds a `Quote`, returning `None` if either side of the book is
    /// empty (a decoder should treat that as a decode error, not a quote).
    pub fn new(
        venue: Venue,
        symbol: impl Into<String>,
        bids: Vec<Level>,
        asks: Vec<Level>,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let best_bid = bids.first()?.0.clone();
        let best_ask = asks.first()?.0.clone();
        Some(Self {
            venue,
            symbol: symbol.into(),
            best_bid,
            best_ask,
            bids,
            asks,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_side() {
        assert!(Quote::new(Venue::Huobi, "ethusdt", vec![], vec![], 0).is_none());
        assert!(Quote::new(
            Venue::Huobi,
            "ethusdt",
            vec![("1".into(), "1".into())],
            vec![],
            0
        )
        .is_none());
    }

    #[test]
    fn new_derives_best_bid_ask_from_first_level() {
        let q = Quote::new(
            Venue::OkEx,
            "ETH-USDT",
            vec![("100".into(), "1".into())],
            vec![("101".into(), "2".into())],
            1_700_000_000_000,
        )
        .unwrap();
        assert_eq!(q.best_bid, "100");
        assert_eq!(q.best_ask, "101");
    }
}
