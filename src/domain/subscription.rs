//! Refcounted Subscription Table
//!
//! Tracks which downstream clients watch which symbols. The table is the
//! single source of truth for upstream subscription state:
//!
//! - symbol -> watcher set (refcount = set size)
//! - client -> watched symbol set (exact inverse of the above)
//!
//! An entry exists iff its watcher set is nonempty. `add`/`remove` report
//! the refcount boundary crossings (0->1 and 1->0) so callers emit exactly
//! one upstream subscribe or unsubscribe per crossing, keeping upstream
//! traffic proportional to distinct symbols rather than client count.
//!
//! After a feed reconnect, [`SubscriptionTable::active_topics`] feeds the
//! resubscribe-replay that restores the upstream side of the invariant.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::interval::CandleInterval;
use super::symbol::FeedClass;

/// Unique identifier for a downstream client connection.
pub type ClientId = String;

/// What a feed is asked to stream: a canonical symbol plus, for kline
/// feeds, the candle interval requested by the first watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTopic {
    /// Canonical instrument identifier.
    pub symbol: String,
    /// Feed that serves this symbol.
    pub feed: FeedClass,
    /// Candle interval, when the feed streams klines.
    pub interval: Option<CandleInterval>,
}

#[derive(Debug)]
struct SubscriptionEntry {
    topic: StreamTopic,
    watchers: HashSet<ClientId>,
}

#[derive(Debug, Default)]
struct TableState {
    /// Canonical symbol -> entry. Present iff at least one watcher.
    entries: HashMap<String, SubscriptionEntry>,
    /// Reverse index: client -> watched symbols. A key exists for every
    /// registered client, even with an empty set.
    client_symbols: HashMap<ClientId, HashSet<String>>,
}

impl TableState {
    /// Returns the topic when this watch raised the refcount 0->1.
    fn add(&mut self, client: &str, topic: StreamTopic) -> Option<StreamTopic> {
        let watched = self.client_symbols.entry(client.to_string()).or_default();
        if !watched.insert(topic.symbol.clone()) {
            // Client already watches this symbol.
            return None;
        }

        match self.entries.get_mut(&topic.symbol) {
            Some(entry) => {
                entry.watchers.insert(client.to_string());
                None
            }
            None => {
                let mut watchers = HashSet::new();
                watchers.insert(client.to_string());
                let first = topic.clone();
                self.entries
                    .insert(topic.symbol.clone(), SubscriptionEntry { topic, watchers });
                Some(first)
            }
        }
    }

    /// Returns the stored topic when this unwatch dropped the refcount 1->0.
    fn remove(&mut self, client: &str, symbol: &str) -> Option<StreamTopic> {
        let watched = self.client_symbols.get_mut(client)?;
        if !watched.remove(symbol) {
            return None;
        }

        let entry = self.entries.get_mut(symbol)?;
        entry.watchers.remove(client);
        if entry.watchers.is_empty() {
            return self.entries.remove(symbol).map(|e| e.topic);
        }
        None
    }

    /// Removes every watch for a client, returning the 1->0 crossings.
    fn remove_client(&mut self, client: &str) -> Vec<StreamTopic> {
        let Some(watched) = self.client_symbols.remove(client) else {
            return Vec::new();
        };

        let mut released = Vec::new();
        for symbol in watched {
            if let Some(entry) = self.entries.get_mut(&symbol) {
                entry.watchers.remove(client);
                if entry.watchers.is_empty()
                    && let Some(entry) = self.entries.remove(&symbol)
                {
                    released.push(entry.topic);
                }
            }
        }
        released
    }

    fn rename_client(&mut self, old: &str, new: &str) {
        let Some(watched) = self.client_symbols.remove(old) else {
            return;
        };
        for symbol in &watched {
            if let Some(entry) = self.entries.get_mut(symbol) {
                entry.watchers.remove(old);
                entry.watchers.insert(new.to_string());
            }
        }
        self.client_symbols
            .entry(new.to_string())
            .or_default()
            .extend(watched);
    }
}

/// Thread-safe refcounted subscription table.
///
/// All mutations take the write lock for the duration of the update, so
/// boundary crossings are totally ordered with respect to the watch and
/// unwatch calls that produced them.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    state: RwLock<TableState>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, creating its (empty) watch set.
    pub fn register_client(&self, client: &str) {
        self.state
            .write()
            .client_symbols
            .entry(client.to_string())
            .or_default();
    }

    /// Add a watch. Returns the topic iff the refcount crossed 0->1 and an
    /// upstream subscribe is needed.
    pub fn add_watch(&self, client: &str, topic: StreamTopic) -> Option<StreamTopic> {
        self.state.write().add(client, topic)
    }

    /// Remove a watch. Returns the stored topic iff the refcount crossed
    /// 1->0 and an upstream unsubscribe is needed.
    pub fn remove_watch(&self, client: &str, symbol: &str) -> Option<StreamTopic> {
        self.state.write().remove(client, symbol)
    }

    /// Remove a client and all its watches. Returns the topics whose
    /// refcount dropped to zero.
    pub fn remove_client(&self, client: &str) -> Vec<StreamTopic> {
        self.state.write().remove_client(client)
    }

    /// Move a client's watches to a new client id, preserving refcounts.
    ///
    /// Used when a stable session reconnects under a fresh transport id
    /// within the disconnect grace period.
    pub fn rename_client(&self, old: &str, new: &str) {
        if old != new {
            self.state.write().rename_client(old, new);
        }
    }

    /// Current watchers of a symbol, empty when nobody watches it.
    #[must_use]
    pub fn watchers_of(&self, symbol: &str) -> Vec<ClientId> {
        self.state
            .read()
            .entries
            .get(symbol)
            .map(|e| e.watchers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics with refcount > 0 routed to the given feed. This is the
    /// replay set after that feed reconnects.
    #[must_use]
    pub fn active_topics(&self, feed: FeedClass) -> Vec<StreamTopic> {
        self.state
            .read()
            .entries
            .values()
            .filter(|e| e.topic.feed == feed)
            .map(|e| e.topic.clone())
            .collect()
    }

    /// Symbols currently watched by a client.
    #[must_use]
    pub fn client_symbols(&self, client: &str) -> Vec<String> {
        self.state
            .read()
            .client_symbols
            .get(client)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All registered clients, watching or not.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        self.state.read().client_symbols.keys().cloned().collect()
    }

    /// Number of symbols with at least one watcher.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.state.read().entries.len()
    }
}
