//! Test utilities for Tunnelrat
//!
//! Loopback listeners, an echo service standing in for the exposed local
//! service, and a builder for relay/agent configurations that point at each
//! other.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tunnelrat::config::{AgentConfig, PoolConfig, RelayConfig};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A port that was free a moment ago
pub async fn free_port() -> u16 {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr.port()
}

/// An address nothing listens on
pub async fn refused_addr() -> String {
    format!("127.0.0.1:{}", free_port().await)
}

/// Spawn a service that echoes every connection back to itself
pub async fn spawn_echo_service() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = conn.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Test configuration builder
pub struct TestConfigBuilder {
    rendezvous_addr: String,
    public_port: u16,
    local_addr: String,
    max_sessions: usize,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            rendezvous_addr: "127.0.0.1:7000".to_string(),
            public_port: 9000,
            local_addr: "127.0.0.1:8080".to_string(),
            max_sessions: 50,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relay rendezvous address
    pub fn rendezvous_addr(mut self, addr: SocketAddr) -> Self {
        self.rendezvous_addr = addr.to_string();
        self
    }

    /// Set the public port the agent requests
    pub fn public_port(mut self, port: u16) -> Self {
        self.public_port = port;
        self
    }

    /// Set the local service address
    pub fn local_addr(mut self, addr: &str) -> Self {
        self.local_addr = addr.to_string();
        self
    }

    /// Set the session ceiling
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Build the relay configuration
    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            bind_addr: "127.0.0.1".to_string(),
            ports: vec![0],
            pool: PoolConfig {
                max_sessions: self.max_sessions,
                negotiate_timeout: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Build the agent configuration
    pub fn agent(&self) -> AgentConfig {
        AgentConfig {
            remote_addr: self.rendezvous_addr.clone(),
            public_port: self.public_port,
            local_addr: self.local_addr.clone(),
            retry_delay: 1,
            local_connect_timeout: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_echo_service() {
        let addr = spawn_echo_service().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_config_builder() {
        let builder = TestConfigBuilder::new()
            .rendezvous_addr("127.0.0.1:1234".parse().unwrap())
            .public_port(9100)
            .local_addr("127.0.0.1:8081")
            .max_sessions(3);

        let agent = builder.agent();
        assert_eq!(agent.remote_addr, "127.0.0.1:1234");
        assert_eq!(agent.public_port, 9100);
        assert!(agent.validate().is_ok());
        assert_eq!(builder.relay().pool.max_sessions, 3);
    }
}
