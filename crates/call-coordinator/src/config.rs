//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing is required, so a bare `call-coordinator` starts a
//! working dev instance.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4480";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default ring timeout in seconds before an unanswered call times out.
pub const DEFAULT_RING_TIMEOUT_SECONDS: u64 = 30;

/// Default per-connection outbound event queue depth.
pub const DEFAULT_CONNECTION_QUEUE_DEPTH: usize = 256;

/// Default node ID prefix.
pub const DEFAULT_NODE_ID_PREFIX: &str = "sb";

/// Coordinator configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:4480").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub node_id: String,

    /// Seconds an unanswered call rings before timing out (default: 30).
    pub ring_timeout_seconds: u64,

    /// Outbound event queue depth per connection (default: 256).
    /// Events past this depth are dropped with a warning rather than
    /// blocking the coordinator on a slow client.
    pub connection_queue_depth: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let ring_timeout_seconds = match vars.get("SB_RING_TIMEOUT_SECONDS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SB_RING_TIMEOUT_SECONDS", raw.clone()))?,
            None => DEFAULT_RING_TIMEOUT_SECONDS,
        };

        let connection_queue_depth = match vars.get("SB_CONNECTION_QUEUE_DEPTH") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SB_CONNECTION_QUEUE_DEPTH", raw.clone()))?,
            None => DEFAULT_CONNECTION_QUEUE_DEPTH,
        };

        if connection_queue_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "SB_CONNECTION_QUEUE_DEPTH",
                "must be at least 1".to_string(),
            ));
        }

        let node_id = vars.get("SB_NODE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_NODE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            node_id,
            ring_timeout_seconds,
            connection_queue_depth,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.ring_timeout_seconds, DEFAULT_RING_TIMEOUT_SECONDS);
        assert_eq!(config.connection_queue_depth, DEFAULT_CONNECTION_QUEUE_DEPTH);
        assert!(config.node_id.starts_with("sb-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("SB_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            (
                "SB_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9001".to_string(),
            ),
            ("SB_NODE_ID".to_string(), "sb-test-001".to_string()),
            ("SB_RING_TIMEOUT_SECONDS".to_string(), "10".to_string()),
            ("SB_CONNECTION_QUEUE_DEPTH".to_string(), "64".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("custom values should load");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(config.node_id, "sb-test-001");
        assert_eq!(config.ring_timeout_seconds, 10);
        assert_eq!(config.connection_queue_depth, 64);
    }

    #[test]
    fn test_invalid_ring_timeout_is_rejected() {
        let vars = HashMap::from([(
            "SB_RING_TIMEOUT_SECONDS".to_string(),
            "soon-ish".to_string(),
        )]);
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue("SB_RING_TIMEOUT_SECONDS", _)))
        );
    }

    #[test]
    fn test_zero_queue_depth_is_rejected() {
        let vars = HashMap::from([("SB_CONNECTION_QUEUE_DEPTH".to_string(), "0".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }
}
