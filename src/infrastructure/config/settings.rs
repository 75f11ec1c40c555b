//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::time::Duration;

/// Credential for a feed that authenticates through its connection URL.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// The raw key for URL construction.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&"[REDACTED]").finish()
    }
}

/// Upstream WebSocket connection settings, shared by all feeds.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering a connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Maximum frames parked per feed while disconnected.
    pub pending_queue_cap: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            pending_queue_cap: 256,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the downstream WebSocket server listens on.
    pub listen_port: u16,
    /// Delay between a client disconnect and the teardown of its watches.
    pub grace_period: Duration,
    /// Upstream connection settings.
    pub websocket: WebSocketSettings,
    /// Forex feed endpoint, without credentials.
    pub forex_endpoint: String,
    /// Forex feed API key.
    pub forex_api_key: ApiKey,
    /// Crypto feed endpoint.
    pub crypto_endpoint: String,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let forex_api_key = std::env::var("TWELVEDATA_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("TWELVEDATA_KEY".to_string()))?;
        if forex_api_key.is_empty() {
            return Err(ConfigError::EmptyValue("TWELVEDATA_KEY".to_string()));
        }

        let forex_endpoint = std::env::var("TICK_RELAY_FOREX_URL")
            .unwrap_or_else(|_| "wss://ws.twelvedata.com/v1/quotes/price".to_string());
        let crypto_endpoint = std::env::var("TICK_RELAY_CRYPTO_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com:9443/ws".to_string());

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                "TICK_RELAY_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "TICK_RELAY_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "TICK_RELAY_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "TICK_RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_env_u32(
                "TICK_RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            pending_queue_cap: parse_env_usize(
                "TICK_RELAY_PENDING_QUEUE_CAP",
                defaults.pending_queue_cap,
            ),
        };

        Ok(Self {
            listen_port: parse_env_u16("PORT", 8080),
            grace_period: parse_env_duration_secs(
                "TICK_RELAY_GRACE_PERIOD_SECS",
                Duration::from_secs(5),
            ),
            websocket,
            forex_endpoint,
            forex_api_key: ApiKey::new(forex_api_key),
            crypto_endpoint,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_redacted_debug() {
        let key = ApiKey::new("key123".to_string());
        let debug = format!("{key:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(settings.max_reconnect_attempts, 5);
        assert_eq!(settings.pending_queue_cap, 256);
    }
}
