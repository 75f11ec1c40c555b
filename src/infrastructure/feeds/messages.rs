//! Upstream Wire Messages
//!
//! Serde shapes for the upstream subscription protocols plus the helpers
//! that pull instrument updates out of loosely structured feed payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::tick::Candle;

// ===== Forex control frames =====

/// Forex subscribe/unsubscribe request.
///
/// Wire form: `{"action":"subscribe","params":{"symbols":"EUR/USD"}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ForexRequest {
    /// `subscribe` or `unsubscribe`.
    pub action: &'static str,
    /// Symbols the action applies to.
    pub params: ForexParams,
}

/// Parameter block of a [`ForexRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct ForexParams {
    /// Comma-separated canonical symbols.
    pub symbols: String,
}

impl ForexRequest {
    /// Subscribe to one symbol.
    #[must_use]
    pub fn subscribe(symbol: &str) -> Self {
        Self {
            action: "subscribe",
            params: ForexParams {
                symbols: symbol.to_string(),
            },
        }
    }

    /// Unsubscribe from one symbol.
    #[must_use]
    pub fn unsubscribe(symbol: &str) -> Self {
        Self {
            action: "unsubscribe",
            params: ForexParams {
                symbols: symbol.to_string(),
            },
        }
    }
}

// ===== Crypto control frames =====

/// Crypto stream subscription request.
///
/// Wire form: `{"method":"SUBSCRIBE","params":["btcusdt@kline_1m"],"id":1}`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    /// `SUBSCRIBE` or `UNSUBSCRIBE`.
    pub method: &'static str,
    /// Stream names the request applies to.
    pub params: Vec<String>,
    /// Request correlation id.
    pub id: u64,
}

// ===== Crypto kline events =====

/// Inbound kline event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    /// Event type discriminator; `kline` for candle updates.
    #[serde(rename = "e")]
    pub event: String,
    /// Instrument symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Candle payload.
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

/// Candle fields of a kline event.
#[derive(Debug, Clone, Deserialize)]
pub struct KlinePayload {
    /// Candle open time, epoch milliseconds.
    #[serde(rename = "t")]
    pub open_time: i64,
    /// Candle close time, epoch milliseconds.
    #[serde(rename = "T")]
    pub close_time: i64,
    /// Interval in wire form.
    #[serde(rename = "i")]
    pub interval: String,
    /// Open price, quoted as a string on the wire.
    #[serde(rename = "o", with = "rust_decimal::serde::str")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "h", with = "rust_decimal::serde::str")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub low: Decimal,
    /// Close price.
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    pub close: Decimal,
    /// Base asset volume.
    #[serde(rename = "v", with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    /// Whether the candle is final.
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl KlineEvent {
    /// Normalize into the candle shape clients receive.
    #[must_use]
    pub fn into_candle(self) -> Candle {
        Candle {
            symbol: self.symbol,
            interval: self.kline.interval,
            open_time: self.kline.open_time,
            close_time: self.kline.close_time,
            open: self.kline.open,
            high: self.kline.high,
            low: self.kline.low,
            close: self.kline.close,
            volume: self.kline.volume,
            is_closed: self.kline.is_closed,
        }
    }
}

// ===== Payload helpers =====

/// Split a feed payload into individual update items.
///
/// Some feeds batch updates under a top-level `data` array; others send a
/// single object per frame. Anything else yields no items.
#[must_use]
pub fn flatten_items(value: Value) -> Vec<Value> {
    match value {
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove("data") {
                items
            } else {
                vec![Value::Object(map)]
            }
        }
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Pull the instrument symbol out of an update item.
///
/// Feeds disagree on the field name; `symbol`, `s` and `ticker` are all
/// seen in the wild.
#[must_use]
pub fn extract_symbol(item: &Value) -> Option<&str> {
    ["symbol", "s", "ticker"]
        .iter()
        .find_map(|key| item.get(key).and_then(Value::as_str))
}
