//! # Tunnelrat - Reverse TCP Tunnel
//!
//! Tunnelrat exposes a TCP service that sits behind NAT or a firewall on a
//! public relay. The agent, running next to the service, dials out to the
//! relay and registers a public port; the relay accepts public connections
//! on that port and pairs each one with a tunnel leg back to the agent.
//!
//! ## Features
//!
//! - **Reusable Tunnel Legs**: a marker sequence ends each logical session,
//!   so one leg carries many public connections one after another
//! - **Per-Port Session Pools**: idle legs are recycled, with a ceiling on
//!   live sessions and a reaper for stale ones
//! - **Fixed 8-Byte Control Records**: `C`, `P`, `S`, `T` and `F` records on
//!   a dedicated control channel, with heartbeats in both directions
//! - **TLS Transport**: rustls with optional mutual authentication
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tunnelrat::config::load_config;
//! use tunnelrat::relay::run_relay;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_relay(config.relay.unwrap_or_default(), shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Public peer -> Relay (public port) ==tunnel leg==> Agent -> Local service
//!                Relay (rendezvous) <==control===== Agent
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod config;
pub mod error;
pub mod helper;
pub mod pool;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use agent::run_agent;
pub use config::{load_config, Config};
pub use error::TunnelratError;
pub use relay::run_relay;

/// Version of the Tunnelrat library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
