//! Tick Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TWELVEDATA_KEY`: Forex feed API key
//!
//! ## Optional
//! - `PORT`: Downstream WebSocket port (default: 8080)
//! - `TICK_RELAY_FOREX_URL`: Forex endpoint (default: Twelve Data quotes stream)
//! - `TICK_RELAY_CRYPTO_URL`: Crypto endpoint (default: Binance combined stream)
//! - `TICK_RELAY_GRACE_PERIOD_SECS`: Disconnect grace period (default: 5)
//! - `TICK_RELAY_MAX_RECONNECT_ATTEMPTS`: Per-outage attempt budget (default: 5)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use tick_relay::application::dispatcher::FanoutDispatcher;
use tick_relay::application::router::SubscriptionRouter;
use tick_relay::application::session::{SessionConfig, SessionManager};
use tick_relay::domain::subscription::SubscriptionTable;
use tick_relay::domain::symbol::DefaultClassifier;
use tick_relay::infrastructure::config::RelayConfig;
use tick_relay::infrastructure::feeds::connection::{
    ConnectionSettings, FeedEvent, UpstreamConnection,
};
use tick_relay::infrastructure::feeds::crypto::CryptoFeed;
use tick_relay::infrastructure::feeds::forex::ForexFeed;
use tick_relay::infrastructure::feeds::heartbeat::HeartbeatConfig;
use tick_relay::infrastructure::feeds::reconnect::ReconnectConfig;
use tick_relay::infrastructure::telemetry;
use tick_relay::infrastructure::transport::ws::WsTransport;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();
    telemetry::init();

    tracing::info!("Starting tick relay");

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let table = Arc::new(SubscriptionTable::new());
    let classifier = Arc::new(DefaultClassifier);

    // One shared event stream for both upstream connections.
    let (feed_events_tx, feed_events_rx) = mpsc::channel::<FeedEvent>(1024);

    let connection_settings = ConnectionSettings {
        reconnect: ReconnectConfig {
            initial_delay: config.websocket.reconnect_delay_initial,
            max_delay: config.websocket.reconnect_delay_max,
            jitter_factor: 0.1,
            max_attempts: config.websocket.max_reconnect_attempts,
        },
        pending_queue_cap: config.websocket.pending_queue_cap,
    };

    let forex_protocol = ForexFeed::new(
        config.forex_endpoint.clone(),
        config.forex_api_key.clone(),
        HeartbeatConfig {
            ping_interval: config.websocket.heartbeat_interval,
            pong_timeout: config.websocket.heartbeat_timeout,
        },
    );
    let (forex_connection, forex_handle) = UpstreamConnection::new(
        forex_protocol,
        connection_settings.clone(),
        Arc::clone(&table),
        feed_events_tx.clone(),
        shutdown_token.clone(),
    );

    let crypto_protocol = CryptoFeed::new(config.crypto_endpoint.clone());
    let (crypto_connection, crypto_handle) = UpstreamConnection::new(
        crypto_protocol,
        connection_settings,
        Arc::clone(&table),
        feed_events_tx,
        shutdown_token.clone(),
    );

    let router = Arc::new(SubscriptionRouter::new(
        Arc::clone(&table),
        classifier.clone(),
        [forex_handle, crypto_handle],
    ));

    let (transport_events_tx, mut transport_events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(WsTransport::new(transport_events_tx));

    let dispatcher = Arc::new(FanoutDispatcher::new(
        Arc::clone(&table),
        classifier,
        transport.clone(),
    ));

    let sessions = Arc::new(SessionManager::new(
        router,
        transport.clone(),
        SessionConfig {
            grace_period: config.grace_period,
        },
    ));

    // Upstream connection tasks
    tokio::spawn(forex_connection.run());
    tokio::spawn(crypto_connection.run());

    // Feed event pump: ticks to the dispatcher, lifecycle to the clients
    let feed_sessions = Arc::clone(&sessions);
    tokio::spawn(async move {
        handle_feed_events(feed_events_rx, dispatcher, feed_sessions).await;
    });

    // Transport event pump
    let transport_sessions = Arc::clone(&sessions);
    tokio::spawn(async move {
        while let Some(event) = transport_events_rx.recv().await {
            transport_sessions.handle_event(event).await;
        }
    });

    // Downstream server
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", config.listen_port).parse()?;
    let server_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.serve(listen_addr, server_cancel).await {
            tracing::error!(error = %e, "downstream server error");
        }
    });

    tracing::info!("Relay ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Pump events from the upstream connections.
async fn handle_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    dispatcher: Arc<FanoutDispatcher>,
    sessions: Arc<SessionManager>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Tick(tick) => {
                dispatcher.dispatch(tick).await;
            }
            FeedEvent::Connected { feed } => {
                tracing::info!(%feed, "feed connected");
                sessions.broadcast_status(feed, "connected").await;
            }
            FeedEvent::Disconnected { feed } => {
                tracing::warn!(%feed, "feed disconnected");
                sessions.broadcast_status(feed, "disconnected").await;
            }
            FeedEvent::Reconnecting { feed, attempt } => {
                tracing::info!(%feed, attempt, "feed reconnecting");
            }
            FeedEvent::Unavailable { feed } => {
                tracing::error!(%feed, "feed unavailable");
                sessions.broadcast_status(feed, "unavailable").await;
            }
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        listen_port = config.listen_port,
        grace_period_secs = config.grace_period.as_secs(),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        forex_endpoint = %config.forex_endpoint,
        crypto_endpoint = %config.crypto_endpoint,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
