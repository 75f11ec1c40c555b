//! Normalized Update Records
//!
//! Uniform internal representation of an inbound feed update. Feed adapters
//! parse their wire formats into a [`Tick`]; the dispatcher only ever sees
//! this shape.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::FeedClass;

/// One inbound update for a single instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument identifier as reported by the feed. Canonicalized by the
    /// dispatcher before lookup.
    pub symbol: String,
    /// Feed the update came from.
    pub feed: FeedClass,
    /// Normalized payload forwarded to watchers as-is.
    pub payload: serde_json::Value,
}

/// Normalized candle extracted from a kline event.
///
/// Serializes with the field names downstream clients receive
/// (`openTime`, `isClosed`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Instrument identifier.
    pub symbol: String,
    /// Candle interval in wire form (`1m`, `1h`, ...).
    pub interval: String,
    /// Candle open time, epoch milliseconds.
    pub open_time: i64,
    /// Candle close time, epoch milliseconds.
    pub close_time: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Whether the candle is final.
    pub is_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_serializes_with_client_field_names() {
        let candle = Candle {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            open_time: 1_700_000_000_000,
            close_time: 1_700_000_059_999,
            open: Decimal::new(42_000, 0),
            high: Decimal::new(42_100, 0),
            low: Decimal::new(41_900, 0),
            close: Decimal::new(42_050, 0),
            volume: Decimal::new(1234, 2),
            is_closed: true,
        };

        let value = serde_json::to_value(&candle).unwrap();
        assert!(value.get("openTime").is_some());
        assert!(value.get("closeTime").is_some());
        assert_eq!(value.get("isClosed"), Some(&serde_json::Value::Bool(true)));
    }
}
