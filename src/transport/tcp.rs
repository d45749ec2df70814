//! TCP transport implementation
//!
//! Plain TCP connections, for deployments that secure the path by other
//! means and for tests.

use super::{Acceptor, AddrMaybeCached, SocketOpts, Transport};
use crate::config::TransportConfig;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Baseline socket options from configuration
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Open a TCP connection with a timeout and apply socket options
pub(crate) async fn connect_tcp(
    addr: &AddrMaybeCached,
    timeout: Duration,
    opts: &SocketOpts,
) -> Result<TcpStream> {
    let resolved = addr.resolve().await?;

    let stream = tokio::time::timeout(timeout, TcpStream::connect(resolved))
        .await
        .with_context(|| format!("Connection timeout to {}", addr.addr()))?
        .with_context(|| format!("Failed to connect to {}", addr.addr()))?;

    opts.hint(&stream);
    Ok(stream)
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn new(config: &TransportConfig) -> Result<Self> {
        let transport = TcpTransport {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            ..TcpTransport::with_defaults()
        };
        Ok(transport.with_connect_timeout(Duration::from_secs(config.connect_timeout)))
    }

    async fn connect(&self, addr: &AddrMaybeCached, opts: SocketOpts) -> Result<Self::Stream> {
        let opts = SocketOpts {
            nodelay: opts.nodelay && self.socket_opts.nodelay,
            ..opts
        };
        let stream = connect_tcp(addr, self.connect_timeout, &opts).await?;
        tracing::debug!("TCP connection established to {}", addr.addr());
        Ok(stream)
    }
}

/// Accept side of the plain TCP transport
#[derive(Debug, Clone, Default)]
pub struct TcpAcceptor;

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    fn new(_config: &TransportConfig) -> Result<Self> {
        Ok(TcpAcceptor)
    }

    async fn handshake(&self, conn: TcpStream) -> Result<Self::Stream> {
        Ok(conn)
    }
}
