#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Tick Relay - Real-Time Market Data Relay
//!
//! Maintains one persistent WebSocket connection per upstream price feed
//! (Forex and Crypto) and fans inbound updates out to downstream clients.
//! Subscriptions are refcounted per symbol: the first watcher opens the
//! upstream stream, the last one closes it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: classification, intervals and the subscription table
//!   - `symbol`: feed classification and canonical casing
//!   - `interval`: supported candle intervals
//!   - `subscription`: refcounted symbol → watcher table
//!   - `tick`: normalized update records
//!
//! - **Application**: orchestration over abstract seams
//!   - `ports`: transport and feed command interfaces
//!   - `router`: watch/unwatch handling and feed routing
//!   - `dispatcher`: tick fan-out to watchers
//!   - `session`: client lifecycle and disconnect grace period
//!
//! - **Infrastructure**: concrete adapters
//!   - `feeds`: per-feed wire protocols and the connection loop
//!   - `transport`: downstream WebSocket server
//!   - `config`: environment-driven settings
//!   - `telemetry`: tracing setup
//!
//! # Data Flow
//!
//! ```text
//! Forex WS  ──┐
//!             │   ┌────────────┐    ┌────────────┐
//!             ├──►│ Dispatcher │───►│ Downstream │──► Client 1
//! Crypto WS ─┘    │  (fan-out) │    │     WS     │──► Client 2
//!                 └────────────┘    └────────────┘──► Client N
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no external integrations.
pub mod domain;

/// Application layer - Orchestration and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::interval::CandleInterval;
pub use domain::subscription::{ClientId, StreamTopic, SubscriptionTable};
pub use domain::symbol::{ClassifiedSymbol, DefaultClassifier, FeedClass, SymbolClassifier};
pub use domain::tick::{Candle, Tick};

// Application layer
pub use application::dispatcher::FanoutDispatcher;
pub use application::ports::{DownstreamTransport, FeedCommand, FeedHandle, TransportEvent};
pub use application::router::SubscriptionRouter;
pub use application::session::{SessionConfig, SessionManager};

// Infrastructure config
pub use infrastructure::config::{ApiKey, ConfigError, RelayConfig, WebSocketSettings};

// Feed adapters (for integration tests)
pub use infrastructure::feeds::connection::{
    ConnectionSettings, FeedEvent, UpstreamConnection,
};
pub use infrastructure::feeds::crypto::CryptoFeed;
pub use infrastructure::feeds::forex::ForexFeed;
pub use infrastructure::feeds::protocol::FeedProtocol;
