//! Subscription Router
//!
//! Decides when watch/unwatch traffic becomes upstream traffic. A watch
//! that raises a symbol's refcount 0->1 produces exactly one subscribe
//! command to the owning feed; an unwatch that drops it 1->0 produces
//! exactly one unsubscribe. Intermediate transitions produce nothing, so
//! upstream load is bounded by distinct watched symbols.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::interval::CandleInterval;
use crate::domain::subscription::{StreamTopic, SubscriptionTable};
use crate::domain::symbol::{FeedClass, SymbolClassifier};

use super::ports::FeedHandle;

/// Rejection of a client watch/unwatch request. Never fatal: the request is
/// dropped and the client receives no acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The symbol failed classification (empty after trimming).
    #[error("invalid symbol")]
    InvalidSymbol,
    /// The interval is outside the accepted set.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
}

/// Routes refcount boundary crossings to the owning feed connection.
pub struct SubscriptionRouter {
    table: Arc<SubscriptionTable>,
    classifier: Arc<dyn SymbolClassifier>,
    feeds: HashMap<FeedClass, FeedHandle>,
    /// Spans each table crossing and its feed send. Watches and session
    /// cleanups run on different tasks; without this, a 1->0 unsubscribe
    /// and a 0->1 subscribe for the same symbol could reach the feed
    /// channel in inverted order and close a stream that still has a
    /// watcher.
    boundary: Mutex<()>,
}

impl SubscriptionRouter {
    /// Create a router over the shared table with one handle per feed.
    #[must_use]
    pub fn new(
        table: Arc<SubscriptionTable>,
        classifier: Arc<dyn SymbolClassifier>,
        feeds: impl IntoIterator<Item = FeedHandle>,
    ) -> Self {
        Self {
            table,
            classifier,
            feeds: feeds.into_iter().map(|h| (h.feed(), h)).collect(),
            boundary: Mutex::new(()),
        }
    }

    /// The shared subscription table.
    #[must_use]
    pub fn table(&self) -> &Arc<SubscriptionTable> {
        &self.table
    }

    /// Register a client watch. Returns the canonical symbol for the
    /// acknowledgement. Sends (or queues) one upstream subscribe iff this
    /// was the symbol's first watcher.
    ///
    /// # Errors
    ///
    /// [`WatchError::InvalidSymbol`] when classification fails,
    /// [`WatchError::InvalidInterval`] when an interval is supplied and not
    /// in the accepted set. No upstream traffic in either case.
    pub fn watch(
        &self,
        client: &str,
        raw_symbol: &str,
        interval: Option<&str>,
    ) -> Result<String, WatchError> {
        let interval = Self::parse_interval(interval)?;
        let classified = self
            .classifier
            .classify(raw_symbol)
            .map_err(|_| WatchError::InvalidSymbol)?;

        let topic = StreamTopic {
            symbol: classified.canonical.clone(),
            feed: classified.feed,
            interval,
        };

        let _ordered = self.boundary.lock();
        if let Some(topic) = self.table.add_watch(client, topic) {
            tracing::debug!(symbol = %topic.symbol, feed = %topic.feed, "first watcher, subscribing upstream");
            self.route(topic.feed, |handle| handle.subscribe(topic.clone()));
        }
        Ok(classified.canonical)
    }

    /// Remove a client watch. Returns the canonical symbol for the
    /// acknowledgement. Sends (or queues) one upstream unsubscribe iff this
    /// was the symbol's last watcher.
    ///
    /// # Errors
    ///
    /// Same validation as [`Self::watch`].
    pub fn unwatch(
        &self,
        client: &str,
        raw_symbol: &str,
        interval: Option<&str>,
    ) -> Result<String, WatchError> {
        Self::parse_interval(interval)?;
        let classified = self
            .classifier
            .classify(raw_symbol)
            .map_err(|_| WatchError::InvalidSymbol)?;

        let _ordered = self.boundary.lock();
        if let Some(topic) = self.table.remove_watch(client, &classified.canonical) {
            tracing::debug!(symbol = %topic.symbol, feed = %topic.feed, "last watcher left, unsubscribing upstream");
            self.route(topic.feed, |handle| handle.unsubscribe(topic.clone()));
        }
        Ok(classified.canonical)
    }

    /// Remove every watch held by a client, unsubscribing each symbol whose
    /// refcount drops to zero. Used by session cleanup.
    pub fn unwatch_all(&self, client: &str) {
        let _ordered = self.boundary.lock();
        let released = self.table.remove_client(client);
        if !released.is_empty() {
            tracing::debug!(client, released = released.len(), "releasing client watches");
        }
        for topic in released {
            self.route(topic.feed, |handle| handle.unsubscribe(topic.clone()));
        }
    }

    fn route(&self, feed: FeedClass, send: impl FnOnce(&FeedHandle)) {
        match self.feeds.get(&feed) {
            Some(handle) => send(handle),
            None => tracing::warn!(feed = %feed, "no connection registered for feed"),
        }
    }

    fn parse_interval(interval: Option<&str>) -> Result<Option<CandleInterval>, WatchError> {
        match interval {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| WatchError::InvalidInterval(raw.to_string())),
        }
    }
}
