//! Crypto Feed Protocol
//!
//! Candlestick stream for crypto pairs. Subscriptions name a stream per
//! symbol and interval (`btcusdt@kline_1m`); requests carry a correlation
//! id the server echoes back. The upstream sends protocol-level pings
//! itself, so no application heartbeat is configured, and it trades around
//! the clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::interval::CandleInterval;
use crate::domain::subscription::StreamTopic;
use crate::domain::symbol::FeedClass;
use crate::domain::tick::Tick;

use super::messages::{KlineEvent, StreamRequest};
use super::protocol::FeedProtocol;

/// Crypto kline feed over WebSocket.
pub struct CryptoFeed {
    endpoint: String,
    request_id: AtomicU64,
}

impl CryptoFeed {
    /// Create a protocol for the given endpoint.
    #[must_use]
    pub const fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            request_id: AtomicU64::new(0),
        }
    }

    fn stream_name(topic: &StreamTopic) -> String {
        let interval = topic.interval.unwrap_or(CandleInterval::OneMinute);
        format!("{}@kline_{}", topic.symbol, interval)
    }

    fn request(&self, method: &'static str, topic: &StreamTopic) -> String {
        let request = StreamRequest {
            method,
            params: vec![Self::stream_name(topic)],
            id: self.request_id.fetch_add(1, Ordering::Relaxed) + 1,
        };
        serde_json::to_string(&request).unwrap_or_default()
    }
}

impl FeedProtocol for CryptoFeed {
    fn feed(&self) -> FeedClass {
        FeedClass::Crypto
    }

    fn url(&self) -> String {
        self.endpoint.clone()
    }

    fn subscribe_frame(&self, topic: &StreamTopic) -> String {
        self.request("SUBSCRIBE", topic)
    }

    fn unsubscribe_frame(&self, topic: &StreamTopic) -> String {
        self.request("UNSUBSCRIBE", topic)
    }

    fn parse(&self, frame: &str) -> Vec<Tick> {
        let Ok(event) = serde_json::from_str::<KlineEvent>(frame) else {
            // Subscription acks and other control frames land here.
            tracing::trace!(frame, "discarding non-kline crypto frame");
            return Vec::new();
        };
        if event.event != "kline" {
            return Vec::new();
        }

        let symbol = event.symbol.clone();
        let candle = event.into_candle();
        match serde_json::to_value(&candle) {
            Ok(payload) => vec![Tick {
                symbol,
                feed: FeedClass::Crypto,
                payload,
            }],
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize candle");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn topic(symbol: &str, interval: Option<CandleInterval>) -> StreamTopic {
        StreamTopic {
            symbol: symbol.to_string(),
            feed: FeedClass::Crypto,
            interval,
        }
    }

    #[test]
    fn stream_name_defaults_to_one_minute() {
        let feed = CryptoFeed::new("wss://example.test/ws".to_string());
        assert_eq!(
            feed.subscribe_frame(&topic("btcusdt", None)),
            r#"{"method":"SUBSCRIBE","params":["btcusdt@kline_1m"],"id":1}"#
        );
    }

    #[test]
    fn request_ids_increase_per_frame() {
        let feed = CryptoFeed::new("wss://example.test/ws".to_string());
        let first = feed.subscribe_frame(&topic("btcusdt", Some(CandleInterval::OneHour)));
        let second = feed.unsubscribe_frame(&topic("btcusdt", Some(CandleInterval::OneHour)));

        assert!(first.contains(r#""params":["btcusdt@kline_1h"]"#));
        assert!(first.contains(r#""id":1"#));
        assert!(second.contains(r#""method":"UNSUBSCRIBE""#));
        assert!(second.contains(r#""id":2"#));
    }

    #[test]
    fn kline_frames_become_candle_ticks() {
        let feed = CryptoFeed::new("wss://example.test/ws".to_string());
        let frame = json!({
            "e": "kline",
            "s": "BTCUSDT",
            "k": {
                "t": 1_700_000_000_000_i64,
                "T": 1_700_000_059_999_i64,
                "i": "1m",
                "o": "42000.10",
                "h": "42100.00",
                "l": "41900.50",
                "c": "42050.25",
                "v": "12.34",
                "x": false
            }
        })
        .to_string();

        let ticks = feed.parse(&frame);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "BTCUSDT");
        assert_eq!(ticks[0].feed, FeedClass::Crypto);
        assert_eq!(ticks[0].payload["openTime"], 1_700_000_000_000_i64);
        assert_eq!(ticks[0].payload["close"], "42050.25");
        assert_eq!(ticks[0].payload["isClosed"], false);
    }

    #[test]
    fn control_frames_are_discarded() {
        let feed = CryptoFeed::new("wss://example.test/ws".to_string());
        assert!(feed.parse(r#"{"result":null,"id":1}"#).is_empty());
        assert!(feed.parse("not json").is_empty());
        assert!(
            feed.parse(&json!({"e": "trade", "s": "BTCUSDT", "k": {}}).to_string())
                .is_empty()
        );
    }
}
