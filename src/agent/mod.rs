//! Agent module for Tunnelrat
//!
//! The agent runs next to the service being exposed. It registers a public
//! port with the relay and opens tunnel legs on request, splicing each one
//! to a connection to the local service.

#[allow(clippy::module_inception)]
mod agent;
mod control_channel;
mod data_channel;

pub use agent::{is_fatal, Agent};
pub use control_channel::ControlChannel;
pub use data_channel::{connect_local, open_data_leg};

use crate::config::{AgentConfig, TransportType};
use crate::transport::TcpTransport;
#[cfg(feature = "rustls-tls")]
use crate::transport::TlsTransport;
use anyhow::Result;
use tokio::sync::broadcast;

/// Run the agent with the given configuration
pub async fn run_agent(config: AgentConfig, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    match config.transport.transport_type {
        TransportType::Tcp => {
            let agent = Agent::<TcpTransport>::new(config)?;
            agent.run(shutdown_rx).await
        }
        #[cfg(feature = "rustls-tls")]
        TransportType::Tls => {
            let agent = Agent::<TlsTransport>::new(config)?;
            agent.run(shutdown_rx).await
        }
        #[cfg(not(feature = "rustls-tls"))]
        TransportType::Tls => {
            anyhow::bail!("TLS transport is not enabled. Recompile with --features rustls-tls")
        }
    }
}
