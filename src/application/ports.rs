//! Port Interfaces
//!
//! Seams between the relay core and the outside world:
//!
//! - [`DownstreamTransport`]: outbound events to connected clients. The
//!   transport layer itself (accepting connections, framing, disconnect
//!   detection) lives outside the core.
//! - [`TransportEvent`]: inbound client lifecycle and watch/unwatch traffic.
//! - [`FeedHandle`]: outbound subscription commands to one upstream feed
//!   connection. Wire frames are built at the connection boundary, so the
//!   router stays feed-format agnostic.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::subscription::{ClientId, StreamTopic};
use crate::domain::symbol::FeedClass;

/// Event name for price/candle updates.
pub const EVENT_TICK: &str = "tick";
/// Event name acknowledging a watch with its canonical symbol.
pub const EVENT_WATCH_OK: &str = "watch:ok";
/// Event name acknowledging an unwatch with its canonical symbol.
pub const EVENT_UNWATCH_OK: &str = "unwatch:ok";
/// Event name for feed availability notices.
pub const EVENT_SERVER_STATUS: &str = "server:status";

/// Stable session identifier supplied by the transport, independent of the
/// per-connection client id. Required for grace-period reconnect detection.
pub type SessionToken = String;

/// Failure delivering an event to one client. Isolated per client: it never
/// affects other deliveries or router state.
#[derive(Debug, thiserror::Error)]
#[error("delivery to client {client} failed: {reason}")]
pub struct DeliveryError {
    /// Client the delivery was addressed to.
    pub client: ClientId,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Outbound side of the downstream transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownstreamTransport: Send + Sync {
    /// Emit a named event with a JSON payload to one client.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when the client cannot be reached.
    async fn emit(
        &self,
        client: &ClientId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

/// Inbound events produced by the downstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A client connected, optionally presenting a stable session token.
    ClientConnected {
        /// Per-connection client id.
        client: ClientId,
        /// Stable identity across reconnects, when the transport has one.
        session: Option<SessionToken>,
    },
    /// A client asks to watch a symbol.
    Watch {
        /// Requesting client.
        client: ClientId,
        /// Raw symbol as typed by the client.
        symbol: String,
        /// Optional candle interval in wire form.
        interval: Option<String>,
    },
    /// A client stops watching a symbol.
    Unwatch {
        /// Requesting client.
        client: ClientId,
        /// Raw symbol as typed by the client.
        symbol: String,
        /// Optional candle interval in wire form.
        interval: Option<String>,
    },
    /// A client disconnected.
    ClientDisconnected {
        /// Disconnected client.
        client: ClientId,
        /// Transport-reported reason, for logging.
        reason: String,
    },
}

/// Subscription command routed to an upstream feed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Open an upstream stream for this topic.
    Subscribe(StreamTopic),
    /// Close the upstream stream for this topic.
    Unsubscribe(StreamTopic),
}

/// Sending half of the command channel into one feed connection task.
///
/// Commands sent while the connection is not open are queued by the
/// connection and drained in order once it opens.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    feed: FeedClass,
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    /// Create a handle wrapping the command channel for `feed`.
    #[must_use]
    pub const fn new(feed: FeedClass, tx: mpsc::UnboundedSender<FeedCommand>) -> Self {
        Self { feed, tx }
    }

    /// Feed this handle routes to.
    #[must_use]
    pub const fn feed(&self) -> FeedClass {
        self.feed
    }

    /// Queue a subscribe for the topic.
    pub fn subscribe(&self, topic: StreamTopic) {
        self.send(FeedCommand::Subscribe(topic));
    }

    /// Queue an unsubscribe for the topic.
    pub fn unsubscribe(&self, topic: StreamTopic) {
        self.send(FeedCommand::Unsubscribe(topic));
    }

    fn send(&self, command: FeedCommand) {
        if self.tx.send(command).is_err() {
            // Connection task is gone; on restart the replay restores state.
            tracing::warn!(feed = %self.feed, "feed connection task is not running");
        }
    }
}
