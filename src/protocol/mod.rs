//! Protocol module for Tunnelrat
//!
//! Two pieces of wire format live here: the fixed-width control records
//! exchanged on control channels (and as the first record of every
//! rendezvous connection), and the terminator marker that delimits logical
//! sessions inside a reused tunnel leg.

mod codec;
mod terminator;
mod types;

pub use codec::{read_command, resync, write_command, ControlSender};
pub use terminator::{Scan, TerminatorScanner, TERMINATOR, TERMINATOR_LEN};
pub use types::{opcode, Command, COMMAND_LEN, HEARTBEAT_OPERAND, MAX_OPERAND};
