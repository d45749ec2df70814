//! Control record definitions
//!
//! Every control message is exactly eight bytes: one ASCII opcode, a
//! zero-padded six digit decimal operand and a newline.

use crate::error::TunnelratError;
use std::fmt;

/// Length of one control record on the wire
pub const COMMAND_LEN: usize = 8;

/// Largest operand that fits in six decimal digits
pub const MAX_OPERAND: u32 = 999_999;

/// Operand carried by heartbeat records
pub const HEARTBEAT_OPERAND: u32 = MAX_OPERAND;

/// Operand carried by the port-unavailable record
const FATAL_OPERAND: u32 = 1;

/// Opcode bytes
pub mod opcode {
    /// Open request (`C<port>` agent to relay, `C<index>` relay to agent)
    pub const CONNECT: u8 = b'C';
    /// Data leg announcement or heartbeat
    pub const LEG: u8 = b'P';
    /// Session released back to the pool
    pub const RELEASE: u8 = b'S';
    /// Terminate session
    pub const TERMINATE: u8 = b'T';
    /// Requested public port unavailable
    pub const FATAL: u8 = b'F';
}

/// A decoded control record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `C`: register a public port (agent) or open a leg for an index (relay)
    Connect(u32),
    /// `P<port>`: the connection carrying it is a data leg for `port`
    DataLeg(u16),
    /// `P999999`: ping from the relay, echoed back by the agent
    Heartbeat,
    /// `S<index>`: the agent side of a session is idle again
    Release(u32),
    /// `T<index>`: tear the session down
    Terminate(u32),
    /// `F000001`: the requested public port is taken
    PortUnavailable,
}

impl Command {
    /// The opcode byte of this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Connect(_) => opcode::CONNECT,
            Command::DataLeg(_) | Command::Heartbeat => opcode::LEG,
            Command::Release(_) => opcode::RELEASE,
            Command::Terminate(_) => opcode::TERMINATE,
            Command::PortUnavailable => opcode::FATAL,
        }
    }

    /// The numeric operand of this command
    pub fn operand(&self) -> u32 {
        match self {
            Command::Connect(n) | Command::Release(n) | Command::Terminate(n) => *n,
            Command::DataLeg(port) => u32::from(*port),
            Command::Heartbeat => HEARTBEAT_OPERAND,
            Command::PortUnavailable => FATAL_OPERAND,
        }
    }

    /// Encode into the eight byte wire form
    ///
    /// Operands are always below `MAX_OPERAND`: indices are capped by the
    /// pool ceiling and ports fit in 16 bits.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let operand = self.operand();
        debug_assert!(operand <= MAX_OPERAND);

        let mut buf = [b'0'; COMMAND_LEN];
        buf[0] = self.opcode();
        let mut rest = operand.min(MAX_OPERAND);
        for slot in buf[1..COMMAND_LEN - 1].iter_mut().rev() {
            *slot = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        buf[COMMAND_LEN - 1] = b'\n';
        buf
    }

    /// Decode an eight byte record
    pub fn decode(raw: &[u8]) -> Result<Command, TunnelratError> {
        let malformed = || TunnelratError::MalformedCommand(String::from_utf8_lossy(raw).into());

        if raw.len() != COMMAND_LEN || raw[COMMAND_LEN - 1] != b'\n' {
            return Err(malformed());
        }

        let digits = &raw[1..COMMAND_LEN - 1];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed());
        }
        let operand = digits
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));

        match raw[0] {
            opcode::CONNECT => Ok(Command::Connect(operand)),
            opcode::LEG if operand == HEARTBEAT_OPERAND => Ok(Command::Heartbeat),
            opcode::LEG => u16::try_from(operand)
                .map(Command::DataLeg)
                .map_err(|_| malformed()),
            opcode::RELEASE => Ok(Command::Release(operand)),
            opcode::TERMINATE => Ok(Command::Terminate(operand)),
            opcode::FATAL => Ok(Command::PortUnavailable),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:06}", self.opcode() as char, self.operand())
    }
}
