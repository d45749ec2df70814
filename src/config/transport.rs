//! Transport configuration types
//!
//! Selects how control channels and tunnel legs are carried: plain TCP or
//! rustls TLS, optionally mutually authenticated.

use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};

/// Transport type enumeration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportType {
    /// Plain TCP transport
    #[default]
    #[serde(rename = "tcp")]
    Tcp,
    /// TLS transport
    #[serde(rename = "tls")]
    Tls,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Main transport configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// Transport type
    #[serde(rename = "type", default)]
    pub transport_type: TransportType,

    /// TCP configuration
    #[serde(default)]
    pub tcp: TcpConfig,

    /// TLS configuration, required when `type = "tls"`
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            transport_type: TransportType::default(),
            tcp: TcpConfig::default(),
            tls: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl TransportConfig {
    /// Validate for the accepting (relay) side
    pub fn validate_acceptor(&self) -> Result<(), String> {
        if self.transport_type != TransportType::Tls {
            return Ok(());
        }
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| "transport type is tls but [transport.tls] is missing".to_string())?;
        if tls.cert.is_none() || tls.key.is_none() {
            return Err("relay TLS transport requires both `cert` and `key`".to_string());
        }
        Ok(())
    }

    /// Validate for the connecting (agent) side
    pub fn validate_connector(&self) -> Result<(), String> {
        if self.connect_timeout == 0 {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.transport_type != TransportType::Tls {
            return Ok(());
        }
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| "transport type is tls but [transport.tls] is missing".to_string())?;
        if tls.cert.is_some() != tls.key.is_some() {
            return Err("client certificate needs both `cert` and `key`".to_string());
        }
        Ok(())
    }
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// TLS material, shared by both roles
///
/// The relay uses `cert`, `key` and, for mutual TLS, `client_ca`. The agent
/// uses `trusted_root`, `hostname`, `skip_verify` and, for mutual TLS,
/// `cert` and `key` as its client identity.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// PEM certificate chain
    #[serde(default)]
    pub cert: Option<String>,

    /// PEM private key
    #[serde(default)]
    pub key: Option<String>,

    /// CA that client certificates must chain to
    #[serde(default)]
    pub client_ca: Option<String>,

    /// Extra root certificate trusted by the agent
    #[serde(default)]
    pub trusted_root: Option<String>,

    /// Server name to verify, defaults to the host of `remote_addr`
    #[serde(default)]
    pub hostname: Option<String>,

    /// Accept any server certificate
    #[serde(default)]
    pub skip_verify: bool,
}
