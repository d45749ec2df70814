//! Helper utilities for Tunnelrat
//!
//! This module provides common constants and small utilities used throughout
//! the relay and the agent.

use backoff::backoff::{Backoff, Constant};
use std::io;
use std::time::Duration;

/// Read size for both pump directions
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default control channel read-idle limit in seconds
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Default relay ping period in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Upper bound for a half-close or close to complete
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether an IO error is an ordinary way for a peer to go away
///
/// Resets, broken pipes and premature EOFs end sessions all the time and are
/// logged at debug level; anything else is worth a warning.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Fixed-delay reconnect schedule for the agent
///
/// The agent retries forever; every failed attempt waits the same delay.
pub struct ReconnectPolicy {
    backoff: Constant,
    delay: Duration,
    attempts: u64,
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("delay", &self.delay)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl ReconnectPolicy {
    /// Create a policy that waits `delay` between attempts
    pub fn new(delay: Duration) -> Self {
        ReconnectPolicy {
            backoff: Constant::new(delay),
            delay,
            attempts: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        self.backoff.next_backoff().unwrap_or(self.delay)
    }

    /// Forget previous failures after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }

    /// Number of consecutive failed attempts
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_BUFFER_SIZE, 8192);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_SECS, 10);
        assert_eq!(DEFAULT_HEARTBEAT_TIMEOUT_SECS, 30);
        assert!(DEFAULT_HEARTBEAT_INTERVAL_SECS < DEFAULT_HEARTBEAT_TIMEOUT_SECS);
    }

    #[test]
    fn test_is_disconnect() {
        let cases = vec![
            (io::ErrorKind::ConnectionReset, true),
            (io::ErrorKind::ConnectionAborted, true),
            (io::ErrorKind::BrokenPipe, true),
            (io::ErrorKind::UnexpectedEof, true),
            (io::ErrorKind::NotConnected, true),
            (io::ErrorKind::PermissionDenied, false),
            (io::ErrorKind::Other, false),
        ];

        for (kind, expected) in cases {
            let err = io::Error::new(kind, "test error");
            assert_eq!(is_disconnect(&err), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_reconnect_policy_is_constant() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.attempts(), 3);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
    }
}
