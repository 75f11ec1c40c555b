//! Forex Feed Protocol
//!
//! Price stream for currency pairs. The endpoint authenticates through an
//! API key in the connection URL, batches updates under an optional `data`
//! array, and goes silent outside trading hours, so an application-level
//! heartbeat guards the connection. The market is closed on weekends and
//! no connection is attempted then.

use chrono::Weekday;

use crate::domain::subscription::StreamTopic;
use crate::domain::symbol::FeedClass;
use crate::domain::tick::Tick;
use crate::infrastructure::config::settings::ApiKey;

use super::heartbeat::HeartbeatConfig;
use super::messages::{ForexRequest, extract_symbol, flatten_items};
use super::protocol::FeedProtocol;

/// Forex price feed over WebSocket.
pub struct ForexFeed {
    endpoint: String,
    api_key: ApiKey,
    heartbeat: HeartbeatConfig,
}

impl ForexFeed {
    /// Create a protocol for the given endpoint and credentials.
    #[must_use]
    pub const fn new(endpoint: String, api_key: ApiKey, heartbeat: HeartbeatConfig) -> Self {
        Self {
            endpoint,
            api_key,
            heartbeat,
        }
    }
}

impl FeedProtocol for ForexFeed {
    fn feed(&self) -> FeedClass {
        FeedClass::Forex
    }

    fn url(&self) -> String {
        format!("{}?apikey={}", self.endpoint, self.api_key.as_str())
    }

    fn subscribe_frame(&self, topic: &StreamTopic) -> String {
        serialize_request(&ForexRequest::subscribe(&topic.symbol))
    }

    fn unsubscribe_frame(&self, topic: &StreamTopic) -> String {
        serialize_request(&ForexRequest::unsubscribe(&topic.symbol))
    }

    fn heartbeat(&self) -> Option<HeartbeatConfig> {
        Some(self.heartbeat.clone())
    }

    fn operates_on(&self, weekday: Weekday) -> bool {
        !matches!(weekday, Weekday::Sat | Weekday::Sun)
    }

    fn parse(&self, frame: &str) -> Vec<Tick> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(frame) else {
            tracing::trace!(frame, "discarding non-JSON forex frame");
            return Vec::new();
        };

        flatten_items(value)
            .into_iter()
            .filter_map(|item| {
                let symbol = extract_symbol(&item)?.to_string();
                Some(Tick {
                    symbol,
                    feed: FeedClass::Forex,
                    payload: item,
                })
            })
            .collect()
    }
}

fn serialize_request(request: &ForexRequest) -> String {
    // Both request structs serialize infallibly.
    serde_json::to_string(request).unwrap_or_default()
}
