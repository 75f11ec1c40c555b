//! Fan-out Dispatcher
//!
//! Bridges inbound feed ticks to downstream clients. A tick is delivered to
//! exactly the clients watching its symbol at arrival time; a tick for a
//! symbol nobody watches is discarded (expected while an unsubscribe is in
//! flight upstream). Delivery is best-effort per client: one failed emit
//! never blocks the rest of the fan-out or touches router state.

use std::sync::Arc;

use serde_json::json;

use crate::domain::subscription::SubscriptionTable;
use crate::domain::symbol::SymbolClassifier;
use crate::domain::tick::Tick;

use super::ports::{DownstreamTransport, EVENT_TICK};

/// Delivers normalized ticks to interested clients.
pub struct FanoutDispatcher {
    table: Arc<SubscriptionTable>,
    classifier: Arc<dyn SymbolClassifier>,
    transport: Arc<dyn DownstreamTransport>,
}

impl FanoutDispatcher {
    /// Create a dispatcher over the shared table and transport.
    #[must_use]
    pub fn new(
        table: Arc<SubscriptionTable>,
        classifier: Arc<dyn SymbolClassifier>,
        transport: Arc<dyn DownstreamTransport>,
    ) -> Self {
        Self {
            table,
            classifier,
            transport,
        }
    }

    /// Fan a tick out to the current watchers of its symbol.
    pub async fn dispatch(&self, tick: Tick) {
        // Feeds report symbols in their own casing; canonicalize exactly as
        // at subscribe time so lookups agree.
        let Ok(classified) = self.classifier.classify(&tick.symbol) else {
            tracing::trace!(symbol = %tick.symbol, "dropping tick with unclassifiable symbol");
            return;
        };

        let watchers = self.table.watchers_of(&classified.canonical);
        if watchers.is_empty() {
            tracing::trace!(symbol = %classified.canonical, "no watchers, discarding tick");
            return;
        }

        let payload = json!({
            "symbol": classified.canonical,
            "payload": tick.payload,
        });

        for client in watchers {
            if let Err(e) = self
                .transport
                .emit(&client, EVENT_TICK, payload.clone())
                .await
            {
                tracing::warn!(client = %e.client, error = %e, "tick delivery failed");
            }
        }
    }
}
