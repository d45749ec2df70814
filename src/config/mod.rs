//! Configuration module for Tunnelrat
//!
//! One TOML file may carry a `[relay]` section, an `[agent]` section or both;
//! the binary picks the one matching its subcommand and lets command line
//! arguments override it.

mod agent;
mod pool;
mod relay;
mod transport;

pub use agent::AgentConfig;
pub use pool::PoolConfig;
pub use relay::RelayConfig;
pub use transport::{TcpConfig, TlsConfig, TransportConfig, TransportType};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Relay configuration
    #[serde(default)]
    pub relay: Option<RelayConfig>,

    /// Agent configuration
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
