//! Transport module for Tunnelrat
//!
//! The engine only needs "a way to obtain an authenticated byte-stream".
//! [`Transport`] is the connecting side (agent), [`Acceptor`] the accepting
//! side (relay). Plain TCP and rustls TLS are provided; everything past the
//! handshake is erased to [`BoxedStream`].

mod addr;
mod tcp;
#[cfg(feature = "rustls-tls")]
mod tls;

pub use addr::AddrMaybeCached;
pub use tcp::{TcpAcceptor, TcpTransport};
#[cfg(feature = "rustls-tls")]
pub use tls::{TlsAcceptor, TlsTransport};

use crate::config::{TcpConfig, TransportConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Socket options for control channels (longer keepalive)
    pub fn for_control_channel() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(30),
            keepalive_interval: Some(10),
        }
    }

    /// Socket options for tunnel legs and the sockets spliced onto them
    pub fn for_data_channel() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }

    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }

    /// Apply options, logging instead of failing
    pub fn hint(&self, stream: &TcpStream) {
        if let Err(e) = self.apply(stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
    }
}

/// Connecting side of the authenticated byte-stream provider
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static;

    /// Create a new transport instance from configuration
    fn new(config: &TransportConfig) -> Result<Self>
    where
        Self: Sized;

    /// Connect to a remote address
    async fn connect(&self, addr: &AddrMaybeCached, opts: SocketOpts) -> Result<Self::Stream>;
}

/// Accepting side of the authenticated byte-stream provider
///
/// A failed handshake is how authentication failures surface: the relay logs
/// it and drops the connection.
#[async_trait]
pub trait Acceptor: Debug + Send + Sync + 'static {
    /// The stream type produced after the handshake
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static;

    /// Create a new acceptor instance from configuration
    fn new(config: &TransportConfig) -> Result<Self>
    where
        Self: Sized;

    /// Run the server side handshake on a freshly accepted connection
    async fn handshake(&self, conn: TcpStream) -> Result<Self::Stream>;
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> StreamDyn for T {}

/// Type-erased stream handed to sessions and control channels
pub type BoxedStream = Box<dyn StreamDyn>;
