//! Relay and agent over loopback TCP

mod common;

use common::{
    create_test_listener, free_port, refused_addr, spawn_echo_service, wait_until,
    TestConfigBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tunnelrat::agent::Agent;
use tunnelrat::relay::RelayServer;
use tunnelrat::transport::{TcpAcceptor, TcpTransport};

struct Tunnel {
    relay: Arc<RelayServer<TcpAcceptor>>,
    public_port: u16,
    relay_shutdown: broadcast::Sender<bool>,
    agent_shutdown: broadcast::Sender<bool>,
}

impl Tunnel {
    async fn start(local_addr: &str) -> Tunnel {
        let (rendezvous, rendezvous_addr) = create_test_listener().await;
        let public_port = free_port().await;
        let builder = TestConfigBuilder::new()
            .rendezvous_addr(rendezvous_addr)
            .public_port(public_port)
            .local_addr(local_addr);

        let relay = Arc::new(RelayServer::with_acceptor(builder.relay(), TcpAcceptor));
        let (relay_shutdown, relay_rx) = broadcast::channel(1);
        tokio::spawn(relay.clone().serve(vec![rendezvous], relay_rx));

        let agent = Agent::with_transport(builder.agent(), TcpTransport::with_defaults());
        let (agent_shutdown, agent_rx) = broadcast::channel(1);
        tokio::spawn(agent.run(agent_rx));

        wait_until("public port registration", || relay.pool(public_port).is_some()).await;
        Tunnel {
            relay,
            public_port,
            relay_shutdown,
            agent_shutdown,
        }
    }

    async fn connect_public(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.public_port))
            .await
            .unwrap()
    }

    async fn stop(self) {
        let _ = self.agent_shutdown.send(true);
        let _ = self.relay_shutdown.send(true);
    }
}

async fn echo_round_trip(conn: &mut TcpStream, payload: &[u8]) {
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, payload);
}

#[tokio::test]
async fn test_public_peer_reaches_local_service() {
    let echo = spawn_echo_service().await;
    let tunnel = Tunnel::start(&echo.to_string()).await;

    let mut public = tunnel.connect_public().await;
    echo_round_trip(&mut public, b"GET / HTTP/1.0\r\n\r\n").await;

    let big: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    echo_round_trip(&mut public, &big).await;

    tunnel.stop().await;
}

#[tokio::test]
async fn test_session_is_reused_after_disconnect() {
    let echo = spawn_echo_service().await;
    let tunnel = Tunnel::start(&echo.to_string()).await;
    let pool = tunnel.relay.pool(tunnel.public_port).unwrap();

    let mut first = tunnel.connect_public().await;
    echo_round_trip(&mut first, b"first").await;
    drop(first);

    wait_until("session 1 to return to the pool", || pool.available_count() == 1).await;

    let mut second = tunnel.connect_public().await;
    echo_round_trip(&mut second, b"second").await;

    let stats = pool.stats();
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(stats.sessions_reused, 1);
    assert_eq!(pool.session_count(), 1);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_refused_local_service_closes_public_peer() {
    let tunnel = Tunnel::start(&refused_addr().await).await;
    let pool = tunnel.relay.pool(tunnel.public_port).unwrap();

    let mut public = tunnel.connect_public().await;
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), public.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.is_empty());

    wait_until("session 1 to return to the pool", || pool.available_count() == 1).await;
    assert_eq!(pool.session_count(), 1);

    tunnel.stop().await;
}

#[tokio::test]
async fn test_agent_shutdown_unregisters_port() {
    let echo = spawn_echo_service().await;
    let tunnel = Tunnel::start(&echo.to_string()).await;
    let relay = tunnel.relay.clone();
    let port = tunnel.public_port;

    let _ = tunnel.agent_shutdown.send(true);
    wait_until("pool removal", || relay.pool(port).is_none()).await;

    let _ = tunnel.relay_shutdown.send(true);
}
