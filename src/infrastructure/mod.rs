//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the seams the application layer defines.

/// Configuration loading.
pub mod config;

/// Upstream feed adapters and connection lifecycle.
pub mod feeds;

/// Tracing setup.
pub mod telemetry;

/// Downstream client transports.
pub mod transport;
