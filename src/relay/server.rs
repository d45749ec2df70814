//! Rendezvous listeners and pool registry
//!
//! Every connection an agent makes to a rendezvous port starts with one
//! control record. `C<port>` turns the connection into the control channel
//! of a new [`SessionPool`]; `P<port>` hands it to that pool as a tunnel leg.

use crate::config::RelayConfig;
use crate::error::TunnelratError;
use crate::pool::SessionPool;
use crate::protocol::{read_command, write_command, Command};
use crate::transport::{Acceptor, BoxedStream, SocketOpts};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wait between shutting down a reconnecting agent's old pool and binding
/// its port again
const REREGISTER_GRACE: Duration = Duration::from_secs(1);

type Registry = Arc<StdMutex<HashMap<u16, Arc<SessionPool>>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u16, Arc<SessionPool>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The relay: rendezvous listeners plus one pool per registered public port
#[derive(Debug)]
pub struct RelayServer<A: Acceptor> {
    config: RelayConfig,
    acceptor: Arc<A>,
    pools: Registry,
    cancel: CancellationToken,
}

impl<A: Acceptor> RelayServer<A> {
    /// Create a relay with the acceptor described by the configuration
    pub fn new(config: RelayConfig) -> Result<Self> {
        let acceptor = A::new(&config.transport).context("Failed to set up transport")?;
        Ok(RelayServer::with_acceptor(config, acceptor))
    }

    /// Create a relay around an existing acceptor
    pub fn with_acceptor(config: RelayConfig, acceptor: A) -> Self {
        RelayServer {
            config,
            acceptor: Arc::new(acceptor),
            pools: Arc::new(StdMutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind every configured rendezvous port
    pub async fn bind(&self) -> Result<Vec<TcpListener>> {
        let mut listeners = Vec::with_capacity(self.config.ports.len());
        for port in &self.config.ports {
            let listener = TcpListener::bind((self.config.bind_addr.as_str(), *port))
                .await
                .with_context(|| {
                    format!("Failed to bind rendezvous port {}:{}", self.config.bind_addr, port)
                })?;
            listeners.push(listener);
        }
        Ok(listeners)
    }

    /// Bind and serve until shutdown
    pub async fn run(self, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let listeners = self.bind().await?;
        Arc::new(self).serve(listeners, shutdown_rx).await
    }

    /// Serve already bound rendezvous listeners until shutdown
    pub async fn serve(
        self: Arc<Self>,
        listeners: Vec<TcpListener>,
        mut shutdown_rx: broadcast::Receiver<bool>,
    ) -> Result<()> {
        for listener in listeners {
            if let Ok(addr) = listener.local_addr() {
                info!("Accepting agents on {}", addr);
            }
            tokio::spawn(self.clone().rendezvous_loop(listener));
        }

        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, stopping relay");
        self.shutdown().await;
        Ok(())
    }

    /// Stop accepting and shut every pool down
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let pools: Vec<Arc<SessionPool>> = lock(&self.pools).drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.shutdown().await;
        }
        info!("Relay stopped");
    }

    /// Pool currently registered for `port`
    pub fn pool(&self, port: u16) -> Option<Arc<SessionPool>> {
        lock(&self.pools).get(&port).cloned()
    }

    /// Registered public ports
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = lock(&self.pools).keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    async fn rendezvous_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (conn, addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Rendezvous accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            if self.config.is_denied(addr.ip()) {
                warn!("Filtered out connection request from {}", addr.ip());
                continue;
            }

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(conn, addr).await {
                    warn!("Rendezvous connection from {} dropped: {:#}", addr, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, conn: TcpStream, addr: SocketAddr) -> Result<()> {
        SocketOpts::from_tcp_config(&self.config.transport.tcp).hint(&conn);
        let stream = self
            .acceptor
            .handshake(conn)
            .await
            .context("Transport handshake failed")?;
        let mut stream: BoxedStream = Box::new(stream);

        let cmd = tokio::time::timeout(self.config.handshake_timeout(), read_command(&mut stream))
            .await
            .map_err(|_| TunnelratError::Timeout("waiting for connection request".to_string()))?
            .context("Bad connection request")?;
        debug!("Received {} from {}", cmd, addr);

        match cmd {
            Command::Connect(port) => self.register(port, addr.ip(), stream).await,
            Command::DataLeg(port) => {
                self.hand_over(port, addr.ip(), stream);
                Ok(())
            }
            other => Err(TunnelratError::Protocol(format!("unexpected first record {}", other)).into()),
        }
    }

    /// Register a control channel for public port `port`
    pub async fn register(&self, port: u32, peer: IpAddr, stream: BoxedStream) -> Result<()> {
        let port = match u16::try_from(port) {
            Ok(port) if port >= self.config.min_public_port => port,
            _ => {
                warn!("Received bad port {} from {}", port, peer);
                return Ok(());
            }
        };

        if let Some(existing) = self.pool(port) {
            if !existing.same_peer(peer) {
                warn!(
                    "{}: requested by {} but owned by {}",
                    port,
                    peer,
                    existing.peer()
                );
                return refuse(port, stream).await;
            }
            info!("{}: agent {} reconnected, replacing pool", port, peer);
            existing.shutdown().await;
            tokio::time::sleep(REREGISTER_GRACE).await;
            remove_if_same(&self.pools, port, &existing);
        }

        let listener = match TcpListener::bind((self.config.bind_addr.as_str(), port)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("{}: cannot create public listener: {}", port, e);
                return refuse(port, stream).await;
            }
        };

        let pool = SessionPool::new(port, peer, stream, self.config.pool.clone());
        let raced = {
            let mut pools = lock(&self.pools);
            if pools.contains_key(&port) {
                true
            } else {
                pools.insert(port, pool.clone());
                false
            }
        };
        if raced {
            warn!("{}: registered concurrently, dropping {}", port, peer);
            pool.shutdown().await;
            return Ok(());
        }
        pool.start(listener).await;

        let registry = self.pools.clone();
        tokio::spawn(async move {
            pool.closed().await;
            remove_if_same(&registry, port, &pool);
        });
        Ok(())
    }

    /// Give a tunnel leg to the pool it announced
    pub fn hand_over(&self, port: u16, peer: IpAddr, leg: BoxedStream) {
        match self.pool(port) {
            Some(pool) if pool.same_peer(peer) => pool.add_leg(leg),
            Some(_) => warn!("{}: tunnel leg from foreign peer {}", port, peer),
            None => warn!("Could not find pool for {}", port),
        }
    }
}

fn remove_if_same(registry: &Registry, port: u16, pool: &Arc<SessionPool>) {
    let mut pools = lock(registry);
    if pools.get(&port).map_or(false, |p| Arc::ptr_eq(p, pool)) {
        pools.remove(&port);
        info!("{}: pool removed", port);
    }
}

async fn refuse(port: u16, mut stream: BoxedStream) -> Result<()> {
    if let Err(e) = write_command(&mut stream, &Command::PortUnavailable).await {
        error!("{}: could not send port unavailable: {}", port, e);
    }
    let _ = stream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpAcceptor;
    use tokio::io::{duplex, AsyncReadExt};

    fn relay() -> RelayServer<TcpAcceptor> {
        let config = RelayConfig {
            bind_addr: "127.0.0.1".to_string(),
            ports: vec![0],
            ..Default::default()
        };
        RelayServer::with_acceptor(config, TcpAcceptor)
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_creates_pool() {
        let relay = relay();
        let port = free_port().await;
        let (local, _agent) = duplex(1024);

        relay.register(port as u32, localhost(), Box::new(local)).await.unwrap();
        assert_eq!(relay.ports(), vec![port]);
        assert!(relay.pool(port).unwrap().same_peer(localhost()));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_low_port_is_dropped() {
        let relay = relay();
        let (local, mut agent) = duplex(1024);

        relay.register(80, localhost(), Box::new(local)).await.unwrap();
        assert!(relay.ports().is_empty());
        let mut buf = Vec::new();
        agent.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_peer_gets_port_unavailable() {
        let relay = relay();
        let port = free_port().await;
        let (first, _first_agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(first)).await.unwrap();

        let (second, mut second_agent) = duplex(1024);
        let other: IpAddr = "10.1.2.3".parse().unwrap();
        relay.register(port as u32, other, Box::new(second)).await.unwrap();

        assert_eq!(
            read_command(&mut second_agent).await.unwrap(),
            Command::PortUnavailable
        );
        assert!(relay.pool(port).unwrap().same_peer(localhost()));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_gets_port_unavailable() {
        let relay = relay();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (local, mut agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(local)).await.unwrap();
        assert_eq!(read_command(&mut agent).await.unwrap(), Command::PortUnavailable);
        assert!(relay.ports().is_empty());
    }

    #[tokio::test]
    async fn test_same_peer_replaces_pool() {
        let relay = relay();
        let port = free_port().await;
        let (first, _first_agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(first)).await.unwrap();
        let old = relay.pool(port).unwrap();

        let (second, _second_agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(second)).await.unwrap();

        let new = relay.pool(port).unwrap();
        assert!(!old.is_active());
        assert!(new.is_active());
        assert!(!Arc::ptr_eq(&old, &new));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_pool_removed_after_control_loss() {
        let relay = relay();
        let port = free_port().await;
        let (local, agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(local)).await.unwrap();

        drop(agent);
        for _ in 0..100 {
            if relay.pool(port).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool still registered");
    }

    #[tokio::test]
    async fn test_hand_over_requires_same_peer() {
        let relay = relay();
        let port = free_port().await;
        let (local, _agent) = duplex(1024);
        relay.register(port as u32, localhost(), Box::new(local)).await.unwrap();

        let (leg, mut leg_remote) = duplex(1024);
        relay.hand_over(port, "10.9.9.9".parse().unwrap(), Box::new(leg));
        let mut buf = Vec::new();
        leg_remote.read_to_end(&mut buf).await.unwrap();
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_rendezvous_rejects_bad_first_record() {
        let relay = Arc::new(relay());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(relay.clone().rendezvous_loop(listener));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"S000001\n").await.unwrap();
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert!(relay.ports().is_empty());
        relay.shutdown().await;
    }
}
