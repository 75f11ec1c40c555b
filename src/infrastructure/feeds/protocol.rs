//! Feed Protocol Abstraction
//!
//! One trait per upstream feed covering everything the shared connection
//! loop needs to differ on: where to connect, how a subscription looks on
//! the wire, whether application pings are required, when the market is
//! open, and how inbound frames become normalized ticks.

use chrono::Weekday;

use crate::domain::subscription::StreamTopic;
use crate::domain::symbol::FeedClass;
use crate::domain::tick::Tick;

use super::heartbeat::HeartbeatConfig;

/// Wire-level behavior of one upstream feed.
///
/// Implementations are state-light; any per-request state (such as
/// correlation ids) uses interior mutability so the connection loop can
/// hold the protocol behind a shared reference.
pub trait FeedProtocol: Send + Sync + 'static {
    /// Feed this protocol serves.
    fn feed(&self) -> FeedClass;

    /// Endpoint to connect to, credentials included where the feed
    /// authenticates by URL.
    fn url(&self) -> String;

    /// Serialized subscribe frame for one topic.
    fn subscribe_frame(&self, topic: &StreamTopic) -> String;

    /// Serialized unsubscribe frame for one topic.
    fn unsubscribe_frame(&self, topic: &StreamTopic) -> String;

    /// Application-level heartbeat, for feeds that go quiet between
    /// updates. `None` when the upstream drives its own pings.
    fn heartbeat(&self) -> Option<HeartbeatConfig> {
        None
    }

    /// Whether the feed has data on the given weekday. Connections are
    /// not attempted outside the operating window.
    fn operates_on(&self, _weekday: Weekday) -> bool {
        true
    }

    /// Parse one inbound text frame into zero or more ticks. Control
    /// frames and malformed payloads yield an empty vector.
    fn parse(&self, frame: &str) -> Vec<Tick>;
}
