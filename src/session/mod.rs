//! Proxy sessions
//!
//! A [`ProxySession`] is shared by the relay and the agent: the relay
//! attaches public peers to it, the agent attaches connections to the local
//! service. Its owner implements [`SessionDelegate`] to learn when a session
//! can be reused and when it is gone.

mod proxy;
mod state;

pub use proxy::{AttachError, ProxySession, SessionDelegate};
pub use state::{PumpState, SessionState, SessionStatus};
