//! Pool counters

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for one session pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Tunnel legs negotiated
    pub sessions_created: AtomicUsize,
    /// Public peers served by an idle pooled session
    pub sessions_reused: AtomicUsize,
    /// `S` records that returned a session to the pool
    pub sessions_released: AtomicUsize,
    /// Sessions terminated by the reaper
    pub sessions_reaped: AtomicUsize,
    /// Attach conflicts resolved by discarding a session
    pub attach_conflicts: AtomicUsize,
    /// Negotiations that timed out or failed
    pub negotiate_failures: AtomicUsize,
}

impl PoolStats {
    /// Create new pool stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a negotiated leg
    pub fn record_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reuse
    pub fn record_reused(&self) {
        self.sessions_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release
    pub fn record_released(&self) {
        self.sessions_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reaped session
    pub fn record_reaped(&self) {
        self.sessions_reaped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attach conflict
    pub fn record_conflict(&self) {
        self.attach_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed negotiation
    pub fn record_negotiate_failure(&self) {
        self.negotiate_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_reused: self.sessions_reused.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            attach_conflicts: self.attach_conflicts.load(Ordering::Relaxed),
            negotiate_failures: self.negotiate_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Tunnel legs negotiated
    pub sessions_created: usize,
    /// Public peers served by a pooled session
    pub sessions_reused: usize,
    /// Sessions returned to the pool
    pub sessions_released: usize,
    /// Sessions terminated by the reaper
    pub sessions_reaped: usize,
    /// Attach conflicts
    pub attach_conflicts: usize,
    /// Failed negotiations
    pub negotiate_failures: usize,
}

impl fmt::Display for PoolStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={}, reused={}, released={}, reaped={}, conflicts={}, negotiate_failures={}",
            self.sessions_created,
            self.sessions_reused,
            self.sessions_released,
            self.sessions_reaped,
            self.attach_conflicts,
            self.negotiate_failures
        )
    }
}
