//! Relay Routing Integration Tests
//!
//! Exercises the full path from client watch requests through the router,
//! dispatcher and session manager, using a recording transport in place of
//! the WebSocket server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use tick_relay::application::dispatcher::FanoutDispatcher;
use tick_relay::application::ports::{
    DeliveryError, DownstreamTransport, FeedCommand, FeedHandle, TransportEvent,
};
use tick_relay::application::router::SubscriptionRouter;
use tick_relay::application::session::{SessionConfig, SessionManager};
use tick_relay::domain::subscription::{ClientId, SubscriptionTable};
use tick_relay::domain::symbol::{DefaultClassifier, FeedClass};
use tick_relay::domain::tick::Tick;
use tick_relay::infrastructure::config::ApiKey;
use tick_relay::infrastructure::feeds::crypto::CryptoFeed;
use tick_relay::infrastructure::feeds::forex::ForexFeed;
use tick_relay::infrastructure::feeds::heartbeat::HeartbeatConfig;
use tick_relay::infrastructure::feeds::protocol::FeedProtocol;

// ===== Recording Transport =====

/// Captures every emitted event for later assertions.
#[derive(Default)]
struct RecordingTransport {
    emitted: Mutex<Vec<(ClientId, String, Value)>>,
}

impl RecordingTransport {
    fn events_for(&self, client: &str) -> Vec<(String, Value)> {
        self.emitted
            .lock()
            .iter()
            .filter(|(c, _, _)| c == client)
            .map(|(_, event, payload)| (event.clone(), payload.clone()))
            .collect()
    }
}

#[async_trait]
impl DownstreamTransport for RecordingTransport {
    async fn emit(
        &self,
        client: &ClientId,
        event: &str,
        payload: Value,
    ) -> Result<(), DeliveryError> {
        self.emitted
            .lock()
            .push((client.clone(), event.to_string(), payload));
        Ok(())
    }
}

// ===== Fixture =====

struct Relay {
    sessions: Arc<SessionManager>,
    dispatcher: FanoutDispatcher,
    transport: Arc<RecordingTransport>,
    table: Arc<SubscriptionTable>,
    forex_rx: mpsc::UnboundedReceiver<FeedCommand>,
    crypto_rx: mpsc::UnboundedReceiver<FeedCommand>,
}

fn relay(grace: Duration) -> Relay {
    let (forex_tx, forex_rx) = mpsc::unbounded_channel();
    let (crypto_tx, crypto_rx) = mpsc::unbounded_channel();

    let table = Arc::new(SubscriptionTable::new());
    let classifier = Arc::new(DefaultClassifier);
    let transport = Arc::new(RecordingTransport::default());

    let router = Arc::new(SubscriptionRouter::new(
        Arc::clone(&table),
        classifier.clone(),
        [
            FeedHandle::new(FeedClass::Forex, forex_tx),
            FeedHandle::new(FeedClass::Crypto, crypto_tx),
        ],
    ));
    let dispatcher = FanoutDispatcher::new(
        Arc::clone(&table),
        classifier,
        transport.clone() as Arc<dyn DownstreamTransport>,
    );
    let sessions = Arc::new(SessionManager::new(
        router,
        transport.clone() as Arc<dyn DownstreamTransport>,
        SessionConfig {
            grace_period: grace,
        },
    ));

    Relay {
        sessions,
        dispatcher,
        transport,
        table,
        forex_rx,
        crypto_rx,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<FeedCommand>) -> Vec<FeedCommand> {
    let mut out = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        out.push(cmd);
    }
    out
}

async fn connect(relay: &Relay, client: &str, session: Option<&str>) {
    relay
        .sessions
        .handle_event(TransportEvent::ClientConnected {
            client: client.to_string(),
            session: session.map(ToString::to_string),
        })
        .await;
}

async fn watch(relay: &Relay, client: &str, symbol: &str, interval: Option<&str>) {
    relay
        .sessions
        .handle_event(TransportEvent::Watch {
            client: client.to_string(),
            symbol: symbol.to_string(),
            interval: interval.map(ToString::to_string),
        })
        .await;
}

async fn unwatch(relay: &Relay, client: &str, symbol: &str) {
    relay
        .sessions
        .handle_event(TransportEvent::Unwatch {
            client: client.to_string(),
            symbol: symbol.to_string(),
            interval: None,
        })
        .await;
}

async fn disconnect(relay: &Relay, client: &str) {
    relay
        .sessions
        .handle_event(TransportEvent::ClientDisconnected {
            client: client.to_string(),
            reason: "closed".to_string(),
        })
        .await;
}

fn forex_tick(symbol: &str) -> Tick {
    Tick {
        symbol: symbol.to_string(),
        feed: FeedClass::Forex,
        payload: json!({"symbol": symbol, "price": 1.0812}),
    }
}

// ===== Tests =====

#[tokio::test]
async fn shared_watch_opens_one_upstream_stream() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;
    connect(&relay, "b", None).await;

    // Mixed casing resolves to one canonical stream.
    watch(&relay, "a", "eur/usd", None).await;
    watch(&relay, "b", "EUR/USD", None).await;

    let sent = drain(&mut relay.forex_rx);
    assert_eq!(sent.len(), 1, "second watcher must not resubscribe");
    assert!(matches!(&sent[0], FeedCommand::Subscribe(t) if t.symbol == "EUR/USD"));

    // Both watchers were acked with the canonical symbol.
    for client in ["a", "b"] {
        let events = relay.transport.events_for(client);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "watch:ok");
        assert_eq!(events[0].1["symbol"], "EUR/USD");
    }

    // First unwatch keeps the stream, last one closes it.
    unwatch(&relay, "a", "EUR/USD").await;
    assert!(drain(&mut relay.forex_rx).is_empty());

    unwatch(&relay, "b", "eur/usd").await;
    let sent = drain(&mut relay.forex_rx);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], FeedCommand::Unsubscribe(t) if t.symbol == "EUR/USD"));
}

#[tokio::test]
async fn crypto_watch_routes_to_crypto_feed_with_interval() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;

    watch(&relay, "a", "BTCUSDT", Some("1h")).await;

    assert!(drain(&mut relay.forex_rx).is_empty());
    let sent = drain(&mut relay.crypto_rx);
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        FeedCommand::Subscribe(t)
            if t.symbol == "btcusdt" && t.interval.map(|i| i.to_string()) == Some("1h".to_string())
    ));

    let events = relay.transport.events_for("a");
    assert_eq!(events[0].1["symbol"], "btcusdt");
}

#[tokio::test]
async fn invalid_interval_is_rejected_without_traffic() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;

    watch(&relay, "a", "btcusdt", Some("2m")).await;

    assert!(relay.transport.events_for("a").is_empty());
    assert!(drain(&mut relay.crypto_rx).is_empty());
    assert_eq!(relay.table.symbol_count(), 0);
}

#[tokio::test]
async fn ticks_fan_out_to_current_watchers_only() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;
    connect(&relay, "b", None).await;
    connect(&relay, "c", None).await;

    watch(&relay, "a", "EUR/USD", None).await;
    watch(&relay, "b", "EUR/USD", None).await;
    watch(&relay, "c", "GBP/JPY", None).await;
    drain(&mut relay.forex_rx);

    // "b" stops watching before the tick arrives.
    unwatch(&relay, "b", "EUR/USD").await;

    relay.dispatcher.dispatch(forex_tick("EUR/USD")).await;

    let a_ticks: Vec<_> = relay
        .transport
        .events_for("a")
        .into_iter()
        .filter(|(event, _)| event == "tick")
        .collect();
    assert_eq!(a_ticks.len(), 1);
    assert_eq!(a_ticks[0].1["symbol"], "EUR/USD");
    assert_eq!(a_ticks[0].1["payload"]["price"], 1.0812);

    assert!(
        !relay
            .transport
            .events_for("b")
            .iter()
            .any(|(event, _)| event == "tick"),
        "unwatched client must not receive the tick"
    );
    assert!(
        !relay
            .transport
            .events_for("c")
            .iter()
            .any(|(event, _)| event == "tick"),
        "watcher of a different symbol must not receive the tick"
    );
}

#[tokio::test]
async fn ticks_for_unwatched_symbols_are_discarded() {
    let relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;

    relay.dispatcher.dispatch(forex_tick("EUR/USD")).await;

    assert!(relay.transport.events_for("a").is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_releases_all_watches_after_grace() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;
    connect(&relay, "b", None).await;

    watch(&relay, "a", "EUR/USD", None).await;
    watch(&relay, "a", "btcusdt", Some("1m")).await;
    watch(&relay, "b", "EUR/USD", None).await;
    drain(&mut relay.forex_rx);
    drain(&mut relay.crypto_rx);

    disconnect(&relay, "a").await;

    // Inside the grace window nothing is released yet.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(relay.table.symbol_count(), 2);

    tokio::time::sleep(Duration::from_secs(4)).await;

    // EUR/USD survives through "b"; the crypto stream is closed.
    assert_eq!(relay.table.watchers_of("EUR/USD"), vec!["b".to_string()]);
    assert!(drain(&mut relay.forex_rx).is_empty());

    let sent = drain(&mut relay.crypto_rx);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], FeedCommand::Unsubscribe(t) if t.symbol == "btcusdt"));
}

#[tokio::test(start_paused = true)]
async fn session_reconnect_preserves_watches_across_grace() {
    let mut relay = relay(Duration::from_secs(5));
    connect(&relay, "a", Some("tok")).await;
    watch(&relay, "a", "EUR/USD", None).await;
    drain(&mut relay.forex_rx);

    disconnect(&relay, "a").await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Same session token, new transport connection.
    connect(&relay, "a2", Some("tok")).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(relay.table.watchers_of("EUR/USD"), vec!["a2".to_string()]);
    assert!(
        drain(&mut relay.forex_rx).is_empty(),
        "resumed session must not close the upstream stream"
    );

    // The resumed client keeps receiving ticks.
    relay.dispatcher.dispatch(forex_tick("EUR/USD")).await;
    assert!(
        relay
            .transport
            .events_for("a2")
            .iter()
            .any(|(event, _)| event == "tick")
    );
}

#[tokio::test]
async fn replay_frames_cover_every_active_topic() {
    let relay = relay(Duration::from_secs(5));
    connect(&relay, "a", None).await;

    watch(&relay, "a", "EUR/USD", None).await;
    watch(&relay, "a", "GBP/JPY", None).await;
    watch(&relay, "a", "btcusdt", Some("1h")).await;

    // What a reconnecting forex connection would replay.
    let forex = ForexFeed::new(
        "wss://example.test/v1/quotes".to_string(),
        ApiKey::new("k".to_string()),
        HeartbeatConfig::default(),
    );
    let topics = relay.table.active_topics(FeedClass::Forex);
    assert_eq!(topics.len(), 2);
    let frames: Vec<String> = topics.iter().map(|t| forex.subscribe_frame(t)).collect();
    assert!(frames.iter().any(|f| f.contains("EUR/USD")));
    assert!(frames.iter().any(|f| f.contains("GBP/JPY")));
    assert!(frames.iter().all(|f| f.contains(r#""action":"subscribe""#)));

    // And the crypto side replays its stream name with the stored interval.
    let crypto = CryptoFeed::new("wss://example.test/ws".to_string());
    let topics = relay.table.active_topics(FeedClass::Crypto);
    assert_eq!(topics.len(), 1);
    assert!(crypto.subscribe_frame(&topics[0]).contains("btcusdt@kline_1h"));
}
