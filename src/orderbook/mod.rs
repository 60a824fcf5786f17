//! Order book module
//!
//! Maintains the best-effort snapshot of each market's two sides and detects
//! material changes between consecutive snapshots.

mod book;
mod order;

pub use book::{Orderbook, OrderbookSide};
pub use order::{sort_active_orders, Order};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ask,
    Bid,
}

impl Side {
    /// The peer side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Ask => Side::Bid,
            Side::Bid => Side::Ask,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Ask => "ask",
            Side::Bid => "bid",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per side
#[derive(Debug, Clone, Default)]
pub struct PerSide<T> {
    pub ask: T,
    pub bid: T,
}

impl<T> PerSide<T> {
    pub fn new(ask: T, bid: T) -> Self {
        Self { ask, bid }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Ask => &self.ask,
            Side::Bid => &self.bid,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Ask => &mut self.ask,
            Side::Bid => &mut self.bid,
        }
    }
}

/// A raw (price, amount) tuple as delivered by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl Level {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

/// A full book snapshot from a backend.
///
/// The sides are optional because wire payloads can omit one; `Orderbook`
/// rejects such snapshots instead of applying them partially.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookSnapshot {
    #[serde(default, deserialize_with = "deserialize_levels")]
    pub asks: Option<Vec<Level>>,

    #[serde(default, deserialize_with = "deserialize_levels")]
    pub bids: Option<Vec<Level>>,

    /// Backend update-sequence id, when the wire format carries one
    #[serde(default)]
    pub updated_id: Option<u64>,
}

impl BookSnapshot {
    /// A well-formed snapshot with both sides present.
    pub fn new(asks: Vec<Level>, bids: Vec<Level>) -> Self {
        Self {
            asks: Some(asks),
            bids: Some(bids),
            updated_id: None,
        }
    }

    pub fn with_updated_id(mut self, updated_id: u64) -> Self {
        self.updated_id = Some(updated_id);
        self
    }
}

/// Custom deserializer for levels from arrays of string pairs
fn deserialize_levels<'de, D>(deserializer: D) -> Result<Option<Vec<Level>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Vec<String>>> = Option::deserialize(deserializer)?;
    let Some(rows) = raw else {
        return Ok(None);
    };
    rows.into_iter()
        .map(|row| {
            if row.len() != 2 {
                return Err(serde::de::Error::custom("level must be a price/amount pair"));
            }
            Ok(Level {
                price: Decimal::from_str(&row[0]).map_err(serde::de::Error::custom)?,
                amount: Decimal::from_str(&row[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opposite_side_is_a_peer_lookup() {
        assert_eq!(Side::Ask.opposite(), Side::Bid);
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite().opposite(), Side::Ask);
    }

    #[test]
    fn snapshot_parses_string_pair_levels() {
        let raw = r#"{
            "asks": [["832199.0", "0.8"], ["832200.5", "1.2"]],
            "bids": [["831000.0", "0.5"]]
        }"#;

        let snapshot: BookSnapshot = serde_json::from_str(raw).unwrap();
        let asks = snapshot.asks.unwrap();
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[0].price, dec!(832199.0));
        assert_eq!(asks[0].amount, dec!(0.8));
        assert_eq!(snapshot.bids.unwrap().len(), 1);
        assert_eq!(snapshot.updated_id, None);
    }

    #[test]
    fn snapshot_keeps_missing_sides_absent() {
        let raw = r#"{"asks": [["100.0", "1.0"]]}"#;
        let snapshot: BookSnapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.asks.is_some());
        assert!(snapshot.bids.is_none());
    }
}
