//! Session pool module for Tunnelrat
//!
//! The relay keeps one [`SessionPool`] per exposed public port. Tunnel legs
//! negotiated with the agent are tracked in a [`SessionArena`] and recycled
//! across public connections until they die or go stale.

mod arena;
mod session_pool;
mod stats;

pub use arena::SessionArena;
pub use session_pool::SessionPool;
pub use stats::{PoolStats, PoolStatsSnapshot};
