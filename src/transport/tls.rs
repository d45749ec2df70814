//! TLS transport implementation
//!
//! Provides TLS-encrypted connections using rustls. When both sides are given
//! certificates the channel is mutually authenticated: the relay requires a
//! client certificate signed by `client_ca`, the agent presents `cert`/`key`.

use super::tcp::connect_tcp;
use super::{Acceptor, AddrMaybeCached, SocketOpts, Transport};
use crate::config::{TlsConfig, TransportConfig};
use crate::error::TunnelratError;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};

/// Client TLS stream type alias
pub type TlsClientStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Server TLS stream type alias
pub type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;

/// Handshake deadline for accepted connections
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(Path::new(path))
        .with_context(|| format!("Failed to open certificate file: {}", path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates from: {}", path))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(Path::new(path)).with_context(|| format!("Failed to open key file: {}", path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to parse key from: {}", path))?
        .ok_or_else(|| anyhow!("No private key found in {}", path))
}

fn root_store(extra: Option<&str>, include_native: bool) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if include_native {
        let native_certs = rustls_native_certs::load_native_certs();
        for cert in native_certs.certs {
            store.add(cert).ok();
        }
    }

    if let Some(path) = extra {
        for cert in load_certs(path)? {
            store
                .add(cert)
                .with_context(|| "Failed to add certificate to store")?;
        }
    }

    Ok(store)
}

fn tls_config(config: &TransportConfig) -> Result<&TlsConfig> {
    config
        .tls
        .as_ref()
        .ok_or_else(|| {
            TunnelratError::Transport("TLS configuration required for TLS transport".to_string())
                .into()
        })
}

/// TLS transport for encrypted connections using rustls
#[derive(Clone)]
pub struct TlsTransport {
    /// TLS connector
    connector: tokio_rustls::TlsConnector,
    /// Server hostname for verification
    hostname: Option<String>,
    /// Connection timeout
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("hostname", &self.hostname)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TlsTransport {
    /// Create a new TLS transport with the given configuration
    pub fn with_config(config: &TlsConfig) -> Result<Self> {
        let builder = if config.skip_verify {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
        } else {
            let roots = root_store(config.trusted_root.as_deref(), true)?;
            ClientConfig::builder().with_root_certificates(roots)
        };

        let tls_config = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                .with_context(|| "Invalid client certificate or key")?,
            _ => builder.with_no_client_auth(),
        };

        Ok(TlsTransport {
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            hostname: config.hostname.clone(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TlsTransport {
    type Stream = TlsClientStream;

    fn new(config: &TransportConfig) -> Result<Self> {
        Ok(TlsTransport::with_config(tls_config(config)?)?
            .with_connect_timeout(Duration::from_secs(config.connect_timeout)))
    }

    async fn connect(&self, addr: &AddrMaybeCached, opts: SocketOpts) -> Result<Self::Stream> {
        let tcp_stream = connect_tcp(addr, self.connect_timeout, &opts).await?;

        let hostname = self.hostname.as_deref().unwrap_or_else(|| addr.host());

        let server_name = ServerName::try_from(hostname.to_string())
            .with_context(|| format!("Invalid hostname: {}", hostname))?;

        let tls_stream = self
            .connector
            .connect(server_name, tcp_stream)
            .await
            .with_context(|| format!("TLS handshake failed with {}", hostname))?;

        tracing::debug!("TLS connection established to {}", addr.addr());

        Ok(tls_stream)
    }
}

/// Accept side of the TLS transport
#[derive(Clone)]
pub struct TlsAcceptor {
    acceptor: tokio_rustls::TlsAcceptor,
    mutual: bool,
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor")
            .field("mutual", &self.mutual)
            .finish()
    }
}

impl TlsAcceptor {
    /// Build the server side from certificate, key and optional client CA
    pub fn with_config(config: &TlsConfig) -> Result<Self> {
        let cert = config
            .cert
            .as_deref()
            .ok_or_else(|| TunnelratError::Transport("TLS acceptor requires `cert`".to_string()))?;
        let key = config
            .key
            .as_deref()
            .ok_or_else(|| TunnelratError::Transport("TLS acceptor requires `key`".to_string()))?;

        let builder = ServerConfig::builder();
        let builder = match config.client_ca.as_deref() {
            Some(ca) => {
                let roots = root_store(Some(ca), false)?;
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .with_context(|| "Failed to build client certificate verifier")?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let server_config = builder
            .with_single_cert(load_certs(cert)?, load_private_key(key)?)
            .with_context(|| "Invalid cert/key")?;

        Ok(TlsAcceptor {
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
            mutual: config.client_ca.is_some(),
        })
    }
}

#[async_trait]
impl Acceptor for TlsAcceptor {
    type Stream = TlsServerStream;

    fn new(config: &TransportConfig) -> Result<Self> {
        TlsAcceptor::with_config(tls_config(config)?)
    }

    async fn handshake(&self, conn: TcpStream) -> Result<Self::Stream> {
        let peer = conn.peer_addr().ok();
        tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(conn))
            .await
            .with_context(|| format!("TLS handshake timeout from {:?}", peer))?
            .with_context(|| format!("TLS handshake failed from {:?}", peer))
    }
}

/// Certificate verifier that accepts all certificates (dangerous!)
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> Result<tokio_rustls::rustls::client::danger::ServerCertVerified, tokio_rustls::rustls::Error>
    {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA384,
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA512,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA384,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA512,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_transport_skip_verify() {
        let config = TlsConfig {
            hostname: Some("example.com".to_string()),
            skip_verify: true,
            ..Default::default()
        };

        let transport = TlsTransport::with_config(&config).unwrap();
        assert_eq!(transport.hostname, Some("example.com".to_string()));
    }

    #[test]
    fn test_tls_transport_with_connect_timeout() {
        let config = TlsConfig {
            skip_verify: true,
            ..Default::default()
        };

        let transport = TlsTransport::with_config(&config)
            .unwrap()
            .with_connect_timeout(Duration::from_secs(30));
        assert_eq!(transport.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_tls_acceptor_requires_cert_and_key() {
        let err = TlsAcceptor::with_config(&TlsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("cert"));
    }

    #[test]
    fn test_tls_acceptor_missing_files() {
        let config = TlsConfig {
            cert: Some("/nonexistent/relay.pem".to_string()),
            key: Some("/nonexistent/relay.key".to_string()),
            ..Default::default()
        };
        assert!(TlsAcceptor::with_config(&config).is_err());
    }

    #[test]
    fn test_transport_requires_tls_section() {
        let config = TransportConfig::default();
        assert!(TlsTransport::new(&config).is_err());
    }
}
