//! Proxy session: one tunnel leg, spliced to a sequence of dests
//!
//! While attached, two tasks pump bytes. The pull task reads the leg, strips
//! the end-of-session marker and forwards to the dest. The push task reads
//! the dest and writes to the leg verbatim. Whichever side finishes first
//! releases the dest and writes one marker onto the leg; the attachment is
//! over once the pull task has also seen the remote side's marker. The leg
//! then stays open for the next attachment.
//!
//! Cancellation is cooperative: every blocking read or write is raced
//! against a [`CancellationToken`]. The session token is cancelled by
//! [`ProxySession::shutdown`]; each attachment gets a child token that is
//! cancelled when its dest is released.

use super::state::{PumpState, SessionState, SessionStatus};
use crate::error::TunnelratError;
use crate::helper::{is_disconnect, CLOSE_TIMEOUT, DEFAULT_BUFFER_SIZE};
use crate::protocol::{Scan, TerminatorScanner, TERMINATOR};
use crate::transport::BoxedStream;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owner notified when a session becomes idle or dies
///
/// The relay pool re-pools idle sessions and frees the slots of dead ones;
/// the agent reports idle sessions with `S<index>` and forgets dead ones.
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    /// Called once per finished attachment and once on shutdown
    async fn shutdown_remote(&self, session: &Arc<ProxySession>);
}

/// A failed [`ProxySession::attach`]; the dest is handed back untouched
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AttachError {
    /// The dest that was not attached
    pub dest: BoxedStream,
    /// Why attaching failed
    #[source]
    pub error: TunnelratError,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Pull,
    Push,
}

enum PullEnd {
    Terminator,
    Eof,
    Failed(io::Error),
    Cancelled,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    pull: PumpState,
    push: PumpState,
    /// An attachment is in progress; cleared when its last pump finishes
    attached: bool,
    /// The current attachment still owns its dest
    dest_live: bool,
    dest_cancel: CancellationToken,
    pumps_running: u8,
    terminated: bool,
    source_ready: bool,
    shutting_down: bool,
    dead: bool,
    attachments: u64,
}

/// One tunnel leg and, while attached, one dest
pub struct ProxySession {
    index: u32,
    source_reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    source_writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    dest_writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    inner: StdMutex<Inner>,
    cancel: CancellationToken,
    delegate: Weak<dyn SessionDelegate>,
    born: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("index", &self.index)
            .field("state", &self.lock().state)
            .finish()
    }
}

impl ProxySession {
    /// Wrap a freshly negotiated tunnel leg
    pub fn new(index: u32, source: BoxedStream, delegate: Weak<dyn SessionDelegate>) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(source);
        let cancel = CancellationToken::new();
        let dest_cancel = cancel.child_token();

        Arc::new(ProxySession {
            index,
            source_reader: Mutex::new(Some(reader)),
            source_writer: Mutex::new(Some(writer)),
            dest_writer: Mutex::new(None),
            inner: StdMutex::new(Inner {
                state: SessionState::New,
                pull: PumpState::Idle,
                push: PumpState::Idle,
                attached: false,
                dest_live: false,
                dest_cancel,
                pumps_running: 0,
                terminated: false,
                source_ready: false,
                shutting_down: false,
                dead: false,
                attachments: 0,
            }),
            cancel,
            delegate,
            born: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
        })
    }

    /// Session index
    pub fn index(&self) -> u32 {
        self.index
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a dest and start both pumps
    ///
    /// Fails with [`TunnelratError::DestAttachConflict`] while a previous
    /// attachment is still running and with [`TunnelratError::SessionClosed`]
    /// once the session is shut down. Either way the existing attachment is
    /// left alone.
    pub async fn attach(self: &Arc<Self>, dest: BoxedStream) -> Result<(), AttachError> {
        let dest_cancel = match self.begin_attachment(true) {
            Ok(token) => token,
            Err(error) => return Err(AttachError { dest, error }),
        };

        let (reader, writer) = tokio::io::split(dest);
        *self.dest_writer.lock().await = Some(writer);

        // Lost a race with shutdown: close the dest it could not see.
        if self.cancel.is_cancelled() {
            if let Some(mut writer) = self.dest_writer.lock().await.take() {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
            }
        }

        debug!("Session {} attached", self.index);
        tokio::spawn(self.clone().pull(dest_cancel.clone()));
        tokio::spawn(self.clone().push(reader, dest_cancel));
        Ok(())
    }

    /// Start an attachment whose dest could not be opened
    ///
    /// The marker is written at once so the remote side releases its dest,
    /// then the leg is drained up to the remote marker. The session goes
    /// idle afterwards like any other finished attachment.
    pub async fn refuse(self: &Arc<Self>) -> Result<(), TunnelratError> {
        let dest_cancel = self.begin_attachment(false)?;
        debug!("Session {} refused, draining leg", self.index);
        tokio::spawn(self.clone().pull(dest_cancel));
        self.send_terminator(true).await;
        Ok(())
    }

    fn begin_attachment(&self, with_dest: bool) -> Result<CancellationToken, TunnelratError> {
        let mut inner = self.lock();
        if inner.dead || inner.shutting_down {
            return Err(TunnelratError::SessionClosed(self.index));
        }
        if inner.attached {
            return Err(TunnelratError::DestAttachConflict(self.index));
        }

        inner.attached = true;
        inner.dest_live = with_dest;
        inner.dest_cancel = self.cancel.child_token();
        inner.pumps_running = if with_dest { 2 } else { 1 };
        inner.terminated = false;
        inner.source_ready = false;
        inner.state = SessionState::Operational;
        inner.pull = PumpState::Reading;
        inner.push = if with_dest {
            PumpState::Reading
        } else {
            PumpState::Stopped
        };
        inner.attachments += 1;
        let token = inner.dest_cancel.clone();
        drop(inner);

        self.touch_read();
        self.touch_write();
        Ok(token)
    }

    async fn pull(self: Arc<Self>, dest_cancel: CancellationToken) {
        let mut guard = self.source_reader.lock().await;
        let end = match guard.as_mut() {
            Some(reader) => self.pull_loop(reader, &dest_cancel).await,
            None => PullEnd::Cancelled,
        };
        if self.cancel.is_cancelled() {
            guard.take();
        }
        drop(guard);

        match end {
            PullEnd::Terminator => {
                debug!("Session {} received terminator", self.index);
                self.set_pump(Direction::Pull, PumpState::Stopped);
                self.shutdown_dest().await;
            }
            PullEnd::Eof => {
                debug!("Session {} leg closed by peer", self.index);
                self.shutdown().await;
            }
            PullEnd::Failed(e) => {
                log_io(self.index, "reading leg", &e);
                self.shutdown().await;
            }
            PullEnd::Cancelled => {}
        }
        self.pump_finished(Direction::Pull).await;
    }

    async fn pull_loop(
        self: &Arc<Self>,
        reader: &mut ReadHalf<BoxedStream>,
        dest_cancel: &CancellationToken,
    ) -> PullEnd {
        let mut scanner = TerminatorScanner::new();
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];

        loop {
            self.set_pump(Direction::Pull, PumpState::Reading);
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return PullEnd::Cancelled,
                res = reader.read(&mut buf) => match res {
                    Ok(0) => return PullEnd::Eof,
                    Ok(n) => n,
                    Err(e) => return PullEnd::Failed(e),
                },
            };
            self.touch_read();

            match scanner.feed(&buf[..n]) {
                Scan::Forward(data) => {
                    if !data.is_empty() {
                        self.forward(&data, dest_cancel).await;
                    }
                }
                Scan::Terminated { forward, discarded } => {
                    if !forward.is_empty() {
                        self.forward(&forward, dest_cancel).await;
                    }
                    if discarded > 0 {
                        debug!(
                            "Session {} dropped {} bytes after terminator",
                            self.index, discarded
                        );
                    }
                    return PullEnd::Terminator;
                }
            }
        }
    }

    /// Write a chunk to the dest; a released dest swallows it
    async fn forward(self: &Arc<Self>, data: &[u8], dest_cancel: &CancellationToken) {
        self.set_pump(Direction::Pull, PumpState::Writing);
        let mut guard = self.dest_writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };

        let res = tokio::select! {
            _ = dest_cancel.cancelled() => return,
            res = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => res,
        };
        drop(guard);

        match res {
            Ok(()) => self.touch_write(),
            Err(e) => {
                log_io(self.index, "writing dest", &e);
                self.shutdown_dest().await;
            }
        }
    }

    async fn push(self: Arc<Self>, mut reader: ReadHalf<BoxedStream>, dest_cancel: CancellationToken) {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let mut leg_failed = false;

        loop {
            self.set_pump(Direction::Push, PumpState::Reading);
            let n = tokio::select! {
                _ = dest_cancel.cancelled() => break,
                res = reader.read(&mut buf) => match res {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        log_io(self.index, "reading dest", &e);
                        break;
                    }
                },
            };
            self.touch_read();

            self.set_pump(Direction::Push, PumpState::Writing);
            let mut guard = self.source_writer.lock().await;
            // Nothing may follow the marker once the dest was released.
            if dest_cancel.is_cancelled() {
                break;
            }
            let Some(writer) = guard.as_mut() else {
                break;
            };
            let res = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = async {
                    writer.write_all(&buf[..n]).await?;
                    writer.flush().await
                } => res,
            };
            drop(guard);

            match res {
                Ok(()) => self.touch_write(),
                Err(e) => {
                    log_io(self.index, "writing leg", &e);
                    leg_failed = true;
                    break;
                }
            }
        }
        drop(reader);

        if leg_failed {
            self.shutdown().await;
        } else {
            self.shutdown_dest().await;
        }
        self.pump_finished(Direction::Push).await;
    }

    /// End the current attachment from this side
    ///
    /// Half-closes the dest, stops both pumps from touching it and writes one
    /// marker onto the leg. Does nothing if the dest was already released.
    async fn shutdown_dest(self: &Arc<Self>) {
        let dest_cancel = {
            let mut inner = self.lock();
            if !inner.dest_live || inner.shutting_down {
                return;
            }
            inner.dest_live = false;
            inner.dest_cancel.clone()
        };
        dest_cancel.cancel();

        let writer = self.dest_writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        }
        debug!("Session {} released its dest", self.index);

        self.send_terminator(false).await;
    }

    /// Write the marker onto the leg
    ///
    /// Sent at most once per attachment unless `force` is set. Returns
    /// whether the marker was written.
    pub async fn send_terminator(self: &Arc<Self>, force: bool) -> bool {
        {
            let mut inner = self.lock();
            if inner.shutting_down || (inner.terminated && !force) {
                return false;
            }
            inner.terminated = true;
            inner.push = PumpState::WritingTerminator;
        }

        let mut guard = self.source_writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        let res = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            res = async {
                writer.write_all(TERMINATOR).await?;
                writer.flush().await
            } => res,
        };
        drop(guard);

        self.set_pump(Direction::Push, PumpState::Stopped);
        match res {
            Ok(()) => {
                self.touch_write();
                debug!("Session {} sent terminator", self.index);
                true
            }
            Err(e) => {
                log_io(self.index, "writing terminator", &e);
                self.shutdown().await;
                false
            }
        }
    }

    async fn pump_finished(self: &Arc<Self>, direction: Direction) {
        {
            let mut inner = self.lock();
            let closing = inner.shutting_down;
            let slot = match direction {
                Direction::Pull => &mut inner.pull,
                Direction::Push => &mut inner.push,
            };
            *slot = if closing {
                PumpState::Closed
            } else {
                PumpState::Stopped
            };

            inner.pumps_running = inner.pumps_running.saturating_sub(1);
            if inner.pumps_running > 0 {
                return;
            }
            inner.attached = false;
            if closing {
                return;
            }
            inner.state = SessionState::Idle;
        }

        debug!("Session {} is idle", self.index);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.shutdown_remote(self).await;
        }
    }

    /// Close the leg and any dest; the session is dead afterwards
    ///
    /// Idempotent. The delegate is notified exactly once.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
            inner.dest_live = false;
        }
        self.cancel.cancel();

        if let Some(mut writer) = self.dest_writer.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        }
        if let Some(mut writer) = self.source_writer.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        }
        // A running pull task owns the lock and drops the reader itself.
        if let Ok(mut reader) = self.source_reader.try_lock() {
            reader.take();
        }

        {
            let mut inner = self.lock();
            inner.dead = true;
            inner.state = SessionState::Dead;
            if !inner.attached {
                inner.pull = PumpState::Closed;
                inner.push = PumpState::Closed;
            }
        }
        debug!("Session {} shut down", self.index);

        if let Some(delegate) = self.delegate.upgrade() {
            delegate.shutdown_remote(self).await;
        }
    }

    /// Record that the remote side reported this leg idle
    pub fn mark_source_ready(&self) {
        self.lock().source_ready = true;
    }

    /// Whether the remote side reported this leg idle since the last attach
    pub fn source_ready(&self) -> bool {
        self.lock().source_ready
    }

    /// Whether an attachment is still running
    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// Whether the session was shut down
    pub fn is_dead(&self) -> bool {
        let inner = self.lock();
        inner.dead || inner.shutting_down
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Whether neither direction saw traffic for longer than `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        let now = self.elapsed_ms();
        let limit = threshold.as_millis() as u64;
        now.saturating_sub(self.last_read_ms.load(Ordering::Relaxed)) > limit
            && now.saturating_sub(self.last_write_ms.load(Ordering::Relaxed)) > limit
    }

    /// Snapshot for logging and diagnostics
    pub fn status(&self) -> SessionStatus {
        let last = self
            .last_read_ms
            .load(Ordering::Relaxed)
            .max(self.last_write_ms.load(Ordering::Relaxed));
        let idle_for = Duration::from_millis(self.elapsed_ms().saturating_sub(last));
        let inner = self.lock();
        SessionStatus {
            index: self.index,
            state: inner.state,
            pull: inner.pull,
            push: inner.push,
            source_ready: inner.source_ready,
            terminated: inner.terminated,
            attachments: inner.attachments,
            idle_for,
        }
    }

    fn set_pump(&self, direction: Direction, state: PumpState) {
        let mut inner = self.lock();
        match direction {
            Direction::Pull => inner.pull = state,
            Direction::Push => inner.push = state,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.born.elapsed().as_millis() as u64
    }

    fn touch_read(&self) {
        self.last_read_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    fn touch_write(&self) {
        self.last_write_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }
}

fn log_io(index: u32, what: &str, err: &io::Error) {
    if is_disconnect(err) {
        debug!("Session {}: peer went away while {}: {}", index, what, err);
    } else {
        warn!("Session {}: error while {}: {}", index, what, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TERMINATOR_LEN;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;

    /// Reports (index, dead) for every notification
    struct Recorder {
        tx: mpsc::UnboundedSender<(u32, bool)>,
    }

    #[async_trait]
    impl SessionDelegate for Recorder {
        async fn shutdown_remote(&self, session: &Arc<ProxySession>) {
            let _ = self.tx.send((session.index(), session.is_dead()));
        }
    }

    struct Harness {
        session: Arc<ProxySession>,
        leg: DuplexStream,
        events: mpsc::UnboundedReceiver<(u32, bool)>,
        _delegate: Arc<dyn SessionDelegate>,
    }

    fn harness(index: u32) -> Harness {
        let (tx, events) = mpsc::unbounded_channel();
        let delegate: Arc<dyn SessionDelegate> = Arc::new(Recorder { tx });
        let (local, leg) = duplex(64 * 1024);
        let session = ProxySession::new(index, Box::new(local), Arc::downgrade(&delegate));
        Harness {
            session,
            leg,
            events,
            _delegate: delegate,
        }
    }

    async fn attach(session: &Arc<ProxySession>) -> DuplexStream {
        let (local, remote) = duplex(64 * 1024);
        session.attach(Box::new(local)).await.unwrap();
        remote
    }

    async fn read_terminator(conn: &mut DuplexStream) {
        let mut buf = vec![0u8; TERMINATOR_LEN];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, TERMINATOR);
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<(u32, bool)>) -> (u32, bool) {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_relays_both_directions() {
        let mut h = harness(1);
        let mut dest = attach(&h.session).await;
        assert_eq!(h.session.state(), SessionState::Operational);

        h.leg.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        dest.write_all(b"world").await.unwrap();
        h.leg.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_remote_terminator_releases_dest() {
        let mut h = harness(2);
        let mut dest = attach(&h.session).await;

        let mut payload = b"bye".to_vec();
        payload.extend_from_slice(TERMINATOR);
        h.leg.write_all(&payload).await.unwrap();

        let mut received = Vec::new();
        dest.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");

        // Our own marker answers the remote one.
        read_terminator(&mut h.leg).await;
        assert_eq!(next_event(&mut h.events).await, (2, false));
        assert!(!h.session.is_attached());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_dest_eof_sends_terminator() {
        let mut h = harness(3);
        let dest = attach(&h.session).await;
        drop(dest);

        read_terminator(&mut h.leg).await;
        assert!(h.session.is_attached());

        h.leg.write_all(TERMINATOR).await.unwrap();
        assert_eq!(next_event(&mut h.events).await, (3, false));
        let status = h.session.status();
        assert!(status.terminated);
        assert_eq!(status.pull, PumpState::Stopped);
        assert_eq!(status.push, PumpState::Stopped);
    }

    #[tokio::test]
    async fn test_attach_conflict_keeps_existing_dest() {
        let mut h = harness(4);
        let mut dest = attach(&h.session).await;

        let (other, _other_remote) = duplex(1024);
        let err = h.session.attach(Box::new(other)).await.unwrap_err();
        assert!(matches!(err.error, TunnelratError::DestAttachConflict(4)));

        h.leg.write_all(b"still here").await.unwrap();
        let mut buf = [0u8; 10];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still here");
    }

    #[tokio::test]
    async fn test_reattach_delivers_no_residual_bytes() {
        let mut h = harness(5);
        let mut first = attach(&h.session).await;

        let mut payload = b"first".to_vec();
        payload.extend_from_slice(TERMINATOR);
        h.leg.write_all(&payload).await.unwrap();
        let mut received = Vec::new();
        first.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"first");
        read_terminator(&mut h.leg).await;
        next_event(&mut h.events).await;

        let mut second = attach(&h.session).await;
        h.leg.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 6];
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"second");
        assert_eq!(h.session.status().attachments, 2);
    }

    #[tokio::test]
    async fn test_refuse_drains_until_remote_terminator() {
        let mut h = harness(6);
        h.session.refuse().await.unwrap();
        read_terminator(&mut h.leg).await;

        let mut payload = b"lost".to_vec();
        payload.extend_from_slice(TERMINATOR);
        h.leg.write_all(&payload).await.unwrap();

        assert_eq!(next_event(&mut h.events).await, (6, false));
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut h = harness(7);
        let mut dest = attach(&h.session).await;

        h.session.shutdown().await;
        h.session.shutdown().await;
        assert_eq!(next_event(&mut h.events).await, (7, true));
        assert!(h.session.is_dead());

        let mut buf = Vec::new();
        dest.read_to_end(&mut buf).await.unwrap();
        h.leg.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        let (other, _other_remote) = duplex(1024);
        let err = h.session.attach(Box::new(other)).await.unwrap_err();
        assert!(matches!(err.error, TunnelratError::SessionClosed(7)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leg_loss_kills_session() {
        let mut h = harness(8);
        let mut dest = attach(&h.session).await;
        drop(h.leg);

        assert_eq!(next_event(&mut h.events).await, (8, true));
        let mut buf = Vec::new();
        dest.read_to_end(&mut buf).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Dead);
    }

    #[tokio::test]
    async fn test_staleness() {
        let h = harness(9);
        assert!(!h.session.is_stale(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.session.is_stale(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_source_ready_reset_on_attach() {
        let h = harness(10);
        h.session.mark_source_ready();
        assert!(h.session.source_ready());
        let _dest = attach(&h.session).await;
        assert!(!h.session.source_ready());
    }
}
