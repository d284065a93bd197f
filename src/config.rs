//! Configuration for the servient and its protocol servers.
//!
//! Configuration is plain data with builder-style `with_*` methods and an
//! explicit `validate()` step. There is no file or environment loading here;
//! embedders construct these structs directly.

use std::time::Duration;
use thiserror::Error;

/// Default per-subscriber queue capacity on the change bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default client-side request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error returned when a configuration value is out of range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Channel capacity must be non-zero
    #[error("channel capacity must be greater than zero")]
    ZeroChannelCapacity,

    /// Bind port must be non-zero outside of tests
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Servient-wide configuration.
#[derive(Debug, Clone)]
pub struct ServientConfig {
    /// Per-subscriber queue capacity used by every change-bus topic.
    pub channel_capacity: usize,
}

impl Default for ServientConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServientConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the change-bus queue capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        Ok(())
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind. Port 0 asks the OS for a free port.
    pub port: u16,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9494,
        }
    }
}

impl WsServerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Override the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// CoAP server configuration.
#[derive(Debug, Clone)]
pub struct CoapServerConfig {
    /// Interface to bind.
    pub host: String,
    /// UDP port to bind. Port 0 asks the OS for a free port.
    pub port: u16,
}

impl Default for CoapServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5683,
        }
    }
}

impl CoapServerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Override the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servient_config_defaults() {
        let config = ServientConfig::new();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_servient_config_rejects_zero_capacity() {
        let config = ServientConfig::new().with_channel_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroChannelCapacity));
    }

    #[test]
    fn test_server_config_builders() {
        let ws = WsServerConfig::new().with_host("0.0.0.0").with_port(0);
        assert_eq!(ws.host, "0.0.0.0");
        assert_eq!(ws.port, 0);
        assert!(ws.validate().is_ok());

        let coap = CoapServerConfig::new().with_host("").with_port(5683);
        assert!(coap.validate().is_err());
    }
}
