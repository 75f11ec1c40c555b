//! Configuration Module
//!
//! Configuration loading for the relay service.

pub mod settings;

pub use settings::{ApiKey, ConfigError, RelayConfig, WebSocketSettings};
