//! Session Manager
//!
//! Tracks downstream client lifecycles. Watch/unwatch requests are
//! delegated to the router and acknowledged with the canonical symbol;
//! invalid requests are dropped without acknowledgement. A disconnect
//! starts a cancellable grace timer before the client's watches are torn
//! down, so a quick reconnect does not churn upstream subscriptions.
//!
//! Reconnect recognition needs a stable identity: transports assign a fresh
//! client id per connection, so the grace period can only transfer state
//! when the transport presents the same session token again. Without a
//! token the grace period merely delays cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::ClientId;
use crate::domain::symbol::FeedClass;

use super::ports::{
    DownstreamTransport, EVENT_SERVER_STATUS, EVENT_UNWATCH_OK, EVENT_WATCH_OK, SessionToken,
    TransportEvent,
};
use super::router::SubscriptionRouter;

/// Session handling knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between a disconnect and the teardown of its watches.
    pub grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Per-client session tracking over the router.
pub struct SessionManager {
    router: Arc<SubscriptionRouter>,
    transport: Arc<dyn DownstreamTransport>,
    config: SessionConfig,
    /// Stable token -> client id currently bound to it.
    sessions: Mutex<HashMap<SessionToken, ClientId>>,
    /// Disconnected clients awaiting cleanup, cancellable on reconnect.
    pending_cleanup: Mutex<HashMap<ClientId, CancellationToken>>,
}

impl SessionManager {
    /// Create a session manager.
    #[must_use]
    pub fn new(
        router: Arc<SubscriptionRouter>,
        transport: Arc<dyn DownstreamTransport>,
        config: SessionConfig,
    ) -> Self {
        Self {
            router,
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
            pending_cleanup: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one transport event.
    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::ClientConnected { client, session } => {
                self.on_connected(&client, session);
            }
            TransportEvent::Watch {
                client,
                symbol,
                interval,
            } => self.on_watch(&client, &symbol, interval.as_deref()).await,
            TransportEvent::Unwatch {
                client,
                symbol,
                interval,
            } => self.on_unwatch(&client, &symbol, interval.as_deref()).await,
            TransportEvent::ClientDisconnected { client, reason } => {
                self.on_disconnected(client, &reason);
            }
        }
    }

    fn on_connected(&self, client: &ClientId, session: Option<SessionToken>) {
        if let Some(token) = session {
            let previous = self.sessions.lock().insert(token, client.clone());
            if let Some(old) = previous
                && old != *client
                && let Some(cancel) = self.pending_cleanup.lock().remove(&old)
            {
                // Same session back within the grace window: move its
                // watches to the new connection instead of tearing down.
                cancel.cancel();
                self.router.table().rename_client(&old, client);
                tracing::info!(old = %old, new = %client, "session resumed within grace period");
            }
        }
        self.router.table().register_client(client);
        tracing::debug!(client = %client, "client connected");
    }

    async fn on_watch(&self, client: &ClientId, symbol: &str, interval: Option<&str>) {
        match self.router.watch(client, symbol, interval) {
            Ok(canonical) => {
                self.acknowledge(client, EVENT_WATCH_OK, &canonical).await;
            }
            Err(e) => tracing::debug!(client = %client, symbol, error = %e, "watch rejected"),
        }
    }

    async fn on_unwatch(&self, client: &ClientId, symbol: &str, interval: Option<&str>) {
        match self.router.unwatch(client, symbol, interval) {
            Ok(canonical) => {
                self.acknowledge(client, EVENT_UNWATCH_OK, &canonical).await;
            }
            Err(e) => tracing::debug!(client = %client, symbol, error = %e, "unwatch rejected"),
        }
    }

    fn on_disconnected(self: &Arc<Self>, client: ClientId, reason: &str) {
        tracing::debug!(client = %client, reason, "client disconnected, scheduling cleanup");

        let cancel = CancellationToken::new();
        if let Some(superseded) = self
            .pending_cleanup
            .lock()
            .insert(client.clone(), cancel.clone())
        {
            // A previous timer for the same id must not fire twice.
            superseded.cancel();
        }

        let manager = Arc::clone(self);
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    manager.cleanup(&client);
                }
            }
        });
    }

    fn cleanup(&self, client: &ClientId) {
        self.pending_cleanup.lock().remove(client);
        self.sessions.lock().retain(|_, bound| bound != client);
        self.router.unwatch_all(client);
        tracing::debug!(client = %client, "session cleaned up");
    }

    async fn acknowledge(&self, client: &ClientId, event: &str, canonical: &str) {
        if let Err(e) = self
            .transport
            .emit(client, event, json!({ "symbol": canonical }))
            .await
        {
            tracing::warn!(client = %client, error = %e, "acknowledgement delivery failed");
        }
    }

    /// Notify every connected client that a feed changed availability.
    pub async fn broadcast_status(&self, feed: FeedClass, status: &str) {
        let payload = json!({ "feed": feed.as_str(), "status": status });
        for client in self.router.table().clients() {
            if let Err(e) = self
                .transport
                .emit(&client, EVENT_SERVER_STATUS, payload.clone())
                .await
            {
                tracing::debug!(client = %e.client, error = %e, "status delivery failed");
            }
        }
    }
}
