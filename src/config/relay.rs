//! Relay configuration types

use super::{PoolConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

/// Default wait for the first record on a rendezvous connection, in seconds
fn default_handshake_timeout() -> u64 {
    3
}

/// Lowest public port an agent may ask for
fn default_min_public_port() -> u16 {
    1025
}

/// Relay configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelayConfig {
    /// Interface for rendezvous and public listeners
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Rendezvous ports agents connect to
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Seconds to receive the first record on a rendezvous connection
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Public ports below this are refused
    #[serde(default = "default_min_public_port")]
    pub min_public_port: u16,

    /// Peers whose connections are dropped on accept
    #[serde(default)]
    pub deny_peers: Vec<IpAddr>,

    /// Transport for rendezvous connections
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-port session pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind_addr: default_bind_addr(),
            ports: Vec::new(),
            handshake_timeout: default_handshake_timeout(),
            min_public_port: default_min_public_port(),
            deny_peers: Vec::new(),
            transport: TransportConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Validate the relay configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ports.is_empty() {
            return Err("at least one rendezvous port is required".to_string());
        }
        if self.ports.contains(&0) {
            return Err("rendezvous port 0 is not allowed".to_string());
        }
        if self.handshake_timeout == 0 {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        self.pool.validate()?;
        self.transport.validate_acceptor()
    }

    /// Whether connections from `ip` are refused
    pub fn is_denied(&self, ip: IpAddr) -> bool {
        self.deny_peers.contains(&ip)
    }

    /// First-record deadline as a [`Duration`]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}
