//! Session pool configuration
//!
//! Limits and timers of the relay-side per-port session pool.

use crate::helper::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_HEARTBEAT_TIMEOUT_SECS};
use crate::protocol::MAX_OPERAND;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default leak ceiling
fn default_max_sessions() -> usize {
    50
}

/// Default wait for a freshly requested tunnel leg, in seconds
fn default_negotiate_timeout() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_heartbeat_timeout() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

/// Default reaper period in seconds
fn default_reap_interval() -> u64 {
    60
}

/// Default staleness threshold in seconds
fn default_stale_after() -> u64 {
    600
}

/// Session pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    /// Maximum number of sessions tracked per public port
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds to wait for the agent to open a requested tunnel leg
    #[serde(default = "default_negotiate_timeout")]
    pub negotiate_timeout: u64,

    /// Seconds between heartbeats sent to the agent
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Seconds of control channel silence before the pool is torn down
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,

    /// Seconds between reaper runs
    #[serde(default = "default_reap_interval")]
    pub reap_interval: u64,

    /// Seconds without reads and writes before a session is reaped
    #[serde(default = "default_stale_after")]
    pub stale_after: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_sessions: default_max_sessions(),
            negotiate_timeout: default_negotiate_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            reap_interval: default_reap_interval(),
            stale_after: default_stale_after(),
        }
    }
}

impl PoolConfig {
    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be greater than 0".to_string());
        }
        if self.max_sessions >= MAX_OPERAND as usize {
            return Err(format!("max_sessions must be below {}", MAX_OPERAND));
        }
        if self.negotiate_timeout == 0 {
            return Err("negotiate_timeout must be greater than 0".to_string());
        }
        if self.heartbeat_interval == 0 || self.reap_interval == 0 {
            return Err("heartbeat_interval and reap_interval must be greater than 0".to_string());
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err("heartbeat_timeout must be larger than heartbeat_interval".to_string());
        }
        Ok(())
    }

    /// Negotiation wait as a [`Duration`]
    pub fn negotiate_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiate_timeout)
    }

    /// Staleness threshold as a [`Duration`]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }
}
