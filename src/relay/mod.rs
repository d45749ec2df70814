//! Relay module for Tunnelrat
//!
//! The relay listens on rendezvous ports for agents. Each agent registers a
//! public port; the relay opens it and pairs every public connection with a
//! tunnel leg back to the agent.

mod server;

pub use server::RelayServer;

use crate::config::{RelayConfig, TransportType};
#[cfg(feature = "rustls-tls")]
use crate::transport::TlsAcceptor;
use crate::transport::TcpAcceptor;
use anyhow::Result;
use tokio::sync::broadcast;

/// Run the relay with the given configuration
pub async fn run_relay(config: RelayConfig, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    match config.transport.transport_type {
        TransportType::Tcp => {
            let relay = RelayServer::<TcpAcceptor>::new(config)?;
            relay.run(shutdown_rx).await
        }
        #[cfg(feature = "rustls-tls")]
        TransportType::Tls => {
            let relay = RelayServer::<TlsAcceptor>::new(config)?;
            relay.run(shutdown_rx).await
        }
        #[cfg(not(feature = "rustls-tls"))]
        TransportType::Tls => {
            anyhow::bail!("TLS transport is not enabled. Recompile with --features rustls-tls")
        }
    }
}
