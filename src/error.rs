//! Error types for Tunnelrat
//!
//! This module defines the typed errors raised by the protocol, session and
//! pool layers. Application plumbing wraps them in `anyhow::Error`.

use std::io;
use thiserror::Error;

/// Main error type for Tunnelrat operations
#[derive(Error, Debug)]
pub enum TunnelratError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A control record did not match `[opcode]\d{6}\n`
    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),

    /// A dest was attached to a session that already has one
    #[error("Session {0} already has a dest attached")]
    DestAttachConflict(u32),

    /// The session was shut down and can never be attached again
    #[error("Session {0} is closed")]
    SessionClosed(u32),

    /// The pool for a public port tracked more sessions than allowed
    #[error("More than {limit} sessions on port {port}, shutting down")]
    SessionLeak {
        /// Public port of the pool
        port: u16,
        /// Configured ceiling
        limit: usize,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The relay refused the requested public port
    #[error("Public port {0} is unavailable on the relay")]
    PortUnavailable(u16),

    /// The control connection was closed by the peer
    #[error("Control channel closed")]
    ControlClosed,

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TunnelratError {
    /// Whether this error means the agent must stop retrying
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelratError::PortUnavailable(_))
    }
}
