//! Address handling with DNS caching
//!
//! Every tunnel leg the agent opens dials the relay through the control
//! channel's address, so the relay is resolved once per control connection
//! and the cached result is reused for its legs. A reconnect builds a new
//! control channel and therefore resolves again.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A `host:port` string with its resolved address cached after first use
#[derive(Debug, Clone)]
pub struct AddrMaybeCached {
    addr: String,
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl AddrMaybeCached {
    /// Create a new address without cached resolution
    pub fn new(addr: &str) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Build from separate host and port arguments
    pub fn from_host_port(host: &str, port: u16) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            AddrMaybeCached::new(&format!("[{}]:{}", host, port))
        } else {
            AddrMaybeCached::new(&format!("{}:{}", host, port))
        }
    }

    /// The address as configured
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Host part, without brackets, used as TLS server name
    pub fn host(&self) -> &str {
        let host = self
            .addr
            .rsplit_once(':')
            .map_or(self.addr.as_str(), |(host, _)| host);
        host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Port part, if the address carries one
    pub fn port(&self) -> Option<u16> {
        self.addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }

    /// Get the cached address if available
    pub async fn get_cached(&self) -> Option<SocketAddr> {
        *self.cached.read().await
    }

    /// Resolve, using the cache when it is populated
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Some(cached) = self.get_cached().await {
            return Ok(cached);
        }
        self.refresh().await
    }

    /// Resolve again and replace the cached value
    async fn refresh(&self) -> Result<SocketAddr> {
        let addr = self.addr.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            addr.to_socket_addrs()
                .with_context(|| format!("Failed to resolve address: {}", addr))?
                .next()
                .ok_or_else(|| anyhow!("No addresses found for: {}", addr))
        })
        .await
        .with_context(|| "DNS resolution task panicked")??;

        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }
}

impl From<SocketAddr> for AddrMaybeCached {
    fn from(addr: SocketAddr) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(Some(addr))),
        }
    }
}

impl From<&str> for AddrMaybeCached {
    fn from(addr: &str) -> Self {
        AddrMaybeCached::new(addr)
    }
}

impl std::fmt::Display for AddrMaybeCached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.addr)
    }
}
