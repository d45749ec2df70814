//! Session and pump states exposed for introspection

use std::fmt;
use std::time::Duration;

/// Lifecycle of a [`ProxySession`](super::ProxySession)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed with only its tunnel leg
    New,
    /// A dest is attached and pumps are running
    Operational,
    /// The last attachment ended cleanly; the leg waits in the pool
    Idle,
    /// Shut down; never attached again
    Dead,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Operational => "operational",
            SessionState::Idle => "idle",
            SessionState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// What one pump direction is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Not started for the current attachment
    Idle,
    /// Waiting on a read
    Reading,
    /// Forwarding a chunk
    Writing,
    /// Writing the end-of-session marker onto the leg
    WritingTerminator,
    /// Finished this attachment cleanly
    Stopped,
    /// Finished because the session was shut down
    Closed,
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PumpState::Idle => "idle",
            PumpState::Reading => "reading",
            PumpState::Writing => "writing",
            PumpState::WritingTerminator => "writing terminator",
            PumpState::Stopped => "stopped",
            PumpState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session index
    pub index: u32,
    /// Lifecycle state
    pub state: SessionState,
    /// Leg to dest direction
    pub pull: PumpState,
    /// Dest to leg direction
    pub push: PumpState,
    /// The remote side reported the leg idle
    pub source_ready: bool,
    /// The marker was sent during the current attachment
    pub terminated: bool,
    /// Number of dests attached over the session's lifetime
    pub attachments: u64,
    /// Time since the most recent read or write
    pub idle_for: Duration,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} (pull: {}, push: {}, attachments: {}, idle {}s)",
            self.index,
            self.state,
            self.pull,
            self.push,
            self.attachments,
            self.idle_for.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_state_display() {
        assert_eq!(PumpState::WritingTerminator.to_string(), "writing terminator");
        assert_eq!(PumpState::Reading.to_string(), "reading");
    }

    #[test]
    fn test_status_display() {
        let status = SessionStatus {
            index: 3,
            state: SessionState::Operational,
            pull: PumpState::Reading,
            push: PumpState::Writing,
            source_ready: false,
            terminated: false,
            attachments: 2,
            idle_for: Duration::from_secs(4),
        };
        assert_eq!(
            status.to_string(),
            "#3 operational (pull: reading, push: writing, attachments: 2, idle 4s)"
        );
    }
}
