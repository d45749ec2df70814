//! Tunnel legs and local service connections
//!
//! A tunnel leg is an outbound connection to the relay's rendezvous port
//! whose first record is `P<port>`. After that record the leg carries only
//! session payload and terminators.

use crate::config::AgentConfig;
use crate::protocol::{write_command, Command};
use crate::transport::{AddrMaybeCached, BoxedStream, SocketOpts, Transport};
use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tracing::debug;

/// Open a tunnel leg for `public_port`
///
/// This function:
/// 1. Connects to the relay through the transport
/// 2. Announces the connection as a data leg with `P<port>`
pub async fn open_data_leg<T: Transport>(
    transport: &T,
    remote_addr: &AddrMaybeCached,
    public_port: u16,
) -> Result<BoxedStream> {
    let conn = transport
        .connect(remote_addr, SocketOpts::for_data_channel())
        .await
        .context("Failed to open tunnel leg")?;
    let mut conn: BoxedStream = Box::new(conn);

    write_command(&mut conn, &Command::DataLeg(public_port))
        .await
        .context("Failed to announce tunnel leg")?;
    debug!("Tunnel leg announced for port {}", public_port);
    Ok(conn)
}

/// Connect to the local service that public peers are forwarded to
pub async fn connect_local(config: &AgentConfig) -> Result<BoxedStream> {
    let stream = tokio::time::timeout(
        config.local_connect_timeout(),
        TcpStream::connect(&config.local_addr),
    )
    .await
    .with_context(|| format!("Connection timeout to local service {}", config.local_addr))?
    .with_context(|| format!("Local service {} unavailable", config.local_addr))?;

    SocketOpts::for_data_channel().hint(&stream);
    debug!("Connected to local service {}", config.local_addr);
    Ok(Box::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_command;
    use crate::transport::TcpTransport;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_data_leg_announces_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = AddrMaybeCached::from(listener.local_addr().unwrap());
        let transport = TcpTransport::with_defaults();

        let (leg, accepted) = tokio::join!(open_data_leg(&transport, &addr, 9000), listener.accept());
        leg.unwrap();
        let (mut relay_side, _) = accepted.unwrap();
        assert_eq!(read_command(&mut relay_side).await.unwrap(), Command::DataLeg(9000));
    }

    #[tokio::test]
    async fn test_connect_local_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = AgentConfig {
            local_addr,
            local_connect_timeout: 1,
            ..Default::default()
        };
        let err = connect_local(&config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("unavailable"));
    }
}
