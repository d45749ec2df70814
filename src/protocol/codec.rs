//! Control record reading and writing
//!
//! Control channels are read in fixed eight byte pulls. A record that fails
//! to decode is followed by a byte-at-a-time resynchronisation up to the
//! next newline so that the following record starts aligned again.

use super::types::{Command, COMMAND_LEN};
use crate::error::TunnelratError;
use crate::helper::CLOSE_TIMEOUT;
use crate::transport::BoxedStream;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Upper bound for a single control record write
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Read one control record
///
/// A short read means the peer closed the control connection and yields
/// [`TunnelratError::ControlClosed`]. A malformed record yields
/// [`TunnelratError::MalformedCommand`] after the stream was resynchronised.
pub async fn read_command<R: AsyncRead + Unpin>(conn: &mut R) -> Result<Command, TunnelratError> {
    let mut buf = [0u8; COMMAND_LEN];
    conn.read_exact(&mut buf).await.map_err(closed_on_eof)?;

    match Command::decode(&buf) {
        Ok(cmd) => {
            trace!("Read command {}", cmd);
            Ok(cmd)
        }
        Err(e) => {
            warn!("Received invalid command {:?}, resynchronising", String::from_utf8_lossy(&buf));
            if buf[COMMAND_LEN - 1] != b'\n' {
                resync(conn).await?;
            }
            Err(e)
        }
    }
}

/// Discard bytes up to and including the next newline
pub async fn resync<R: AsyncRead + Unpin>(conn: &mut R) -> Result<usize, TunnelratError> {
    let mut skipped = 0;
    loop {
        let byte = conn.read_u8().await.map_err(closed_on_eof)?;
        skipped += 1;
        if byte == b'\n' {
            trace!("Resynchronised after {} bytes", skipped);
            return Ok(skipped);
        }
    }
}

/// Write one control record and flush it
pub async fn write_command<W: AsyncWrite + Unpin>(
    conn: &mut W,
    cmd: &Command,
) -> Result<(), TunnelratError> {
    conn.write_all(&cmd.encode()).await?;
    conn.flush().await?;
    trace!("Wrote command {}", cmd);
    Ok(())
}

fn closed_on_eof(err: io::Error) -> TunnelratError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TunnelratError::ControlClosed
    } else {
        TunnelratError::Io(err)
    }
}

/// Shared write side of a control channel
///
/// Several tasks (accept path, reaper, heartbeat, session delegates) emit
/// records on the same channel; the mutex keeps records whole.
#[derive(Debug)]
pub struct ControlSender {
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
}

impl ControlSender {
    /// Wrap the write half of a control connection
    pub fn new(writer: WriteHalf<BoxedStream>) -> Self {
        ControlSender {
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Send one record
    pub async fn send(&self, cmd: Command) -> Result<(), TunnelratError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TunnelratError::ControlClosed)?;
        tokio::time::timeout(SEND_TIMEOUT, write_command(writer, &cmd))
            .await
            .map_err(|_| TunnelratError::Timeout(format!("writing {}", cmd)))?
    }

    /// Half-close and drop the control connection's write side
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        }
    }
}
