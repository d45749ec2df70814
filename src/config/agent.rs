//! Agent configuration types

use super::TransportConfig;
use crate::helper::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HEARTBEAT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_heartbeat_timeout() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

/// Default reconnect delay in seconds
fn default_retry_delay() -> u64 {
    5
}

fn default_local_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Agent configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// Relay rendezvous address (e.g., "relay.example.com:7000")
    #[serde(default)]
    pub remote_addr: String,

    /// Public port the relay should expose
    #[serde(default)]
    pub public_port: u16,

    /// Local service that public connections are forwarded to
    #[serde(default)]
    pub local_addr: String,

    /// Seconds of control channel silence before reconnecting
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,

    /// Fixed delay between reconnect attempts, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Timeout for connecting to the local service, in seconds
    #[serde(default = "default_local_connect_timeout")]
    pub local_connect_timeout: u64,

    /// Transport for the control channel and tunnel legs
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            remote_addr: String::new(),
            public_port: 0,
            local_addr: String::new(),
            heartbeat_timeout: default_heartbeat_timeout(),
            retry_delay: default_retry_delay(),
            local_connect_timeout: default_local_connect_timeout(),
            transport: TransportConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Validate the agent configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.remote_addr.is_empty() {
            return Err("remote_addr is required".to_string());
        }
        if self.local_addr.is_empty() {
            return Err("local_addr is required".to_string());
        }
        if self.public_port == 0 {
            return Err("public_port is required".to_string());
        }
        if self.heartbeat_timeout == 0 || self.local_connect_timeout == 0 {
            return Err("heartbeat_timeout and local_connect_timeout must be greater than 0".to_string());
        }
        self.transport.validate_connector()
    }

    /// Control channel read-idle limit as a [`Duration`]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout)
    }

    /// Reconnect delay as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Local connect timeout as a [`Duration`]
    pub fn local_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.local_connect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AgentConfig {
        AgentConfig {
            remote_addr: "relay.example.com:7000".to_string(),
            public_port: 9000,
            local_addr: "127.0.0.1:8080".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.local_connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_agent_config_validate() {
        assert!(valid().validate().is_ok());

        let config = AgentConfig {
            public_port: 0,
            ..valid()
        };
        assert!(config.validate().unwrap_err().contains("public_port"));

        let config = AgentConfig {
            remote_addr: String::new(),
            ..valid()
        };
        assert!(config.validate().unwrap_err().contains("remote_addr"));
    }
}
