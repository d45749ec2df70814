//! Relay-side session pool for one public port
//!
//! The pool owns the public listener, the control channel to the agent that
//! registered the port and every session negotiated over it. Public peers
//! are served by an idle session when one is available; otherwise the agent
//! is asked for a new tunnel leg with `C<index>` and the pool waits for it to
//! arrive through the rendezvous listener.

use super::arena::SessionArena;
use super::stats::{PoolStats, PoolStatsSnapshot};
use crate::config::PoolConfig;
use crate::error::TunnelratError;
use crate::protocol::{read_command, Command, ControlSender};
use crate::session::{AttachError, ProxySession, SessionDelegate, SessionStatus};
use crate::transport::{BoxedStream, SocketOpts};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::ReadHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
struct PoolState {
    sessions: SessionArena<Arc<ProxySession>>,
    available: VecDeque<u32>,
}

/// Incoming tunnel legs
///
/// `owed` counts negotiations that timed out before their leg arrived. The
/// agent still answers them in order, so that many legs are dropped before a
/// leg is paired with a new index.
#[derive(Debug)]
struct LegQueue {
    rx: mpsc::Receiver<BoxedStream>,
    owed: usize,
}

/// Sessions, control channel and public listener for one public port
#[derive(Debug)]
pub struct SessionPool {
    port: u16,
    peer: IpAddr,
    config: PoolConfig,
    control: ControlSender,
    control_reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    state: StdMutex<PoolState>,
    legs_tx: mpsc::Sender<BoxedStream>,
    legs: Mutex<LegQueue>,
    active: AtomicBool,
    cancel: CancellationToken,
    stats: PoolStats,
}

impl SessionPool {
    /// Create a pool over a registered control channel
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(port: u16, peer: IpAddr, control: BoxedStream, config: PoolConfig) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(control);
        let (legs_tx, legs_rx) = mpsc::channel(config.max_sessions.max(1));

        Arc::new(SessionPool {
            port,
            peer,
            control: ControlSender::new(writer),
            control_reader: Mutex::new(Some(reader)),
            state: StdMutex::new(PoolState {
                sessions: SessionArena::new(config.max_sessions),
                available: VecDeque::new(),
            }),
            legs_tx,
            legs: Mutex::new(LegQueue { rx: legs_rx, owed: 0 }),
            active: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            stats: PoolStats::new(),
            config,
        })
    }

    /// Spawn the accept loop, control reader, heartbeat and reaper
    pub async fn start(self: &Arc<Self>, listener: TcpListener) {
        if let Some(reader) = self.control_reader.lock().await.take() {
            tokio::spawn(self.clone().control_loop(reader));
        }
        tokio::spawn(self.clone().accept_loop(listener));
        tokio::spawn(self.clone().heartbeat_loop());
        tokio::spawn(self.clone().reap_loop());
        info!("{}: pool started for {}", self.port, self.peer);
    }

    /// Public port served by this pool
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the agent that registered the port
    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// Whether `ip` is the agent that owns this pool
    pub fn same_peer(&self, ip: IpAddr) -> bool {
        self.peer == ip
    }

    /// Whether the pool still serves its port
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once the pool has shut down
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand over a tunnel leg announced with `P<port>`
    pub fn add_leg(&self, leg: BoxedStream) {
        if !self.is_active() {
            debug!("{}: pool inactive, dropping tunnel leg", self.port);
            return;
        }
        if let Err(e) = self.legs_tx.try_send(leg) {
            warn!("{}: cannot queue tunnel leg: {}", self.port, e);
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (conn, addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("{}: accept failed: {}", self.port, e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            SocketOpts::for_data_channel().hint(&conn);
            debug!("{}: public connection from {}", self.port, addr);

            let res = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.accept(Box::new(conn)) => res,
            };
            match res {
                Ok(()) => {}
                Err(e @ TunnelratError::SessionLeak { .. }) => {
                    error!("{}: {}", self.port, e);
                    self.shutdown().await;
                    break;
                }
                Err(TunnelratError::ControlClosed) => {
                    info!("{}: control channel closed", self.port);
                    self.shutdown().await;
                    break;
                }
                Err(e) => warn!("{}: dropping public connection from {}: {}", self.port, addr, e),
            }
        }
        debug!("{}: exiting accept loop", self.port);
    }

    /// Pair a public connection with a session
    ///
    /// Reuses an idle session when possible, otherwise negotiates a new tunnel
    /// leg. A session that refuses the attachment is shut down and the next
    /// one is tried. Exceeding the session ceiling yields
    /// [`TunnelratError::SessionLeak`].
    pub async fn accept(self: &Arc<Self>, public: BoxedStream) -> Result<(), TunnelratError> {
        let mut public = public;
        loop {
            let pooled = self.take_available();
            let reused = pooled.is_some();
            let session = match pooled {
                Some(session) => {
                    self.control.send(Command::Connect(session.index())).await?;
                    session
                }
                None => self.negotiate().await?,
            };

            match session.attach(public).await {
                Ok(()) => {
                    if reused {
                        self.stats.record_reused();
                    }
                    debug!("{}: public peer attached to session {}", self.port, session.index());
                    return Ok(());
                }
                Err(AttachError { dest, error }) => {
                    warn!("{}: {}, discarding session and retrying", self.port, error);
                    self.stats.record_conflict();
                    session.shutdown().await;
                    public = dest;
                }
            }
        }
    }

    fn take_available(&self) -> Option<Arc<ProxySession>> {
        let mut state = self.lock();
        trace!(
            "{}: {} sessions available of {}",
            self.port,
            state.available.len(),
            state.sessions.len()
        );
        while let Some(index) = state.available.pop_back() {
            match state.sessions.get(index) {
                Some(session) if !session.is_dead() => return Some(session.clone()),
                _ => debug!("{}: skipping stale available index {}", self.port, index),
            }
        }
        None
    }

    async fn negotiate(self: &Arc<Self>) -> Result<Arc<ProxySession>, TunnelratError> {
        let index = self
            .lock()
            .sessions
            .reserve()
            .ok_or(TunnelratError::SessionLeak {
                port: self.port,
                limit: self.config.max_sessions,
            })?;

        let mut legs = self.legs.lock().await;
        // Legs that show up after an earlier negotiation gave up.
        while let Ok(late) = legs.rx.try_recv() {
            legs.owed = legs.owed.saturating_sub(1);
            debug!("{}: dropping late tunnel leg {:?}", self.port, late);
        }

        let res = match self.control.send(Command::Connect(index)).await {
            Ok(()) => self.wait_for_leg(&mut legs, index).await,
            Err(e) => Err(e),
        };
        drop(legs);

        match res {
            Ok(leg) => {
                let weak = Arc::downgrade(self);
                let delegate: Weak<dyn SessionDelegate> = weak;
                let session = ProxySession::new(index, leg, delegate);
                self.lock().sessions.fill(index, session.clone());
                self.stats.record_created();
                info!("{}: negotiated session {}", self.port, index);
                Ok(session)
            }
            Err(e) => {
                self.lock().sessions.release(index);
                self.stats.record_negotiate_failure();
                Err(e)
            }
        }
    }

    async fn wait_for_leg(
        &self,
        legs: &mut LegQueue,
        index: u32,
    ) -> Result<BoxedStream, TunnelratError> {
        let deadline = tokio::time::Instant::now() + self.config.negotiate_timeout();
        let mut dropped = false;
        loop {
            match tokio::time::timeout_at(deadline, legs.rx.recv()).await {
                Ok(Some(late)) if legs.owed > 0 => {
                    legs.owed -= 1;
                    dropped = true;
                    debug!("{}: dropping late tunnel leg {:?}", self.port, late);
                }
                Ok(Some(leg)) => return Ok(leg),
                Ok(None) => return Err(TunnelratError::ControlClosed),
                Err(_) => {
                    // An agent that skipped an owed leg must not starve every
                    // later negotiation.
                    if !dropped {
                        legs.owed += 1;
                    }
                    return Err(TunnelratError::Timeout(format!(
                        "waiting for tunnel leg {}",
                        index
                    )));
                }
            }
        }
    }

    /// Handle `S<index>`: the agent side of a session is idle again
    pub fn release(&self, index: u32) {
        let mut state = self.lock();
        let Some(session) = state.sessions.get(index).cloned() else {
            warn!("{}: release for unknown session {}", self.port, index);
            return;
        };

        if !session.is_attached() && !session.is_dead() {
            if !state.available.contains(&index) {
                state.available.push_back(index);
                self.stats.record_released();
                debug!("{}: session {} returned to pool", self.port, index);
            }
        } else {
            session.mark_source_ready();
        }
    }

    /// Terminate every session idle for longer than `stale_after`
    pub async fn reap(&self) -> usize {
        let threshold = self.config.stale_after();
        let stale: Vec<Arc<ProxySession>> = self
            .lock()
            .sessions
            .iter()
            .filter(|session| session.is_stale(threshold))
            .cloned()
            .collect();

        for session in &stale {
            info!("{}: reaping stale session {}", self.port, session.index());
            if let Err(e) = self.control.send(Command::Terminate(session.index())).await {
                debug!("{}: could not send terminate: {}", self.port, e);
            }
            session.shutdown().await;
            self.stats.record_reaped();
        }
        stale.len()
    }

    async fn control_loop(self: Arc<Self>, mut reader: ReadHalf<BoxedStream>) {
        let idle = Duration::from_secs(self.config.heartbeat_timeout);
        loop {
            let res = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(idle, read_command(&mut reader)) => res,
            };
            match res {
                Err(_) => {
                    warn!("{}: no control traffic for {:?}, closing", self.port, idle);
                    break;
                }
                Ok(Ok(cmd)) => self.handle_command(cmd).await,
                Ok(Err(TunnelratError::MalformedCommand(_))) => continue,
                Ok(Err(TunnelratError::ControlClosed)) => {
                    info!("{}: agent {} disconnected", self.port, self.peer);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("{}: control channel error: {}", self.port, e);
                    break;
                }
            }
        }
        self.shutdown().await;
        debug!("{}: exiting control loop", self.port);
    }

    async fn handle_command(&self, cmd: Command) {
        debug!("{}: received command {}", self.port, cmd);
        match cmd {
            Command::Release(index) => self.release(index),
            Command::Terminate(index) => {
                let session = self.lock().sessions.get(index).cloned();
                match session {
                    Some(session) => session.shutdown().await,
                    None => debug!("{}: terminate for unknown session {}", self.port, index),
                }
            }
            Command::Heartbeat => trace!("{}: heartbeat answered", self.port),
            other => warn!("{}: unexpected command {}", self.port, other),
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.heartbeat_interval);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.control.send(Command::Heartbeat).await {
                warn!("{}: heartbeat failed: {}", self.port, e);
                self.shutdown().await;
                break;
            }
        }
    }

    async fn reap_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.reap_interval);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.reap().await;
            self.log_health();
        }
    }

    /// Stop serving the port and shut every session down
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("{}: shutting down pool", self.port);
        self.cancel.cancel();
        self.control.close().await;

        let sessions: Vec<Arc<ProxySession>> = {
            let mut state = self.lock();
            state.available.clear();
            state.sessions.iter().cloned().collect()
        };
        for session in sessions {
            session.shutdown().await;
        }
        info!("{}: pool is now shut down", self.port);
    }

    /// Counters
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of tracked sessions, including pending negotiations
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of idle sessions ready for reuse
    pub fn available_count(&self) -> usize {
        self.lock().available.len()
    }

    /// Status of every tracked session
    pub fn sessions(&self) -> Vec<SessionStatus> {
        self.lock().sessions.iter().map(|s| s.status()).collect()
    }

    /// Log pool health status
    pub fn log_health(&self) {
        let (tracked, available) = {
            let state = self.lock();
            (state.sessions.len(), state.available.len())
        };
        debug!(
            "{}: pool health: tracked={}, available={}, {}",
            self.port,
            tracked,
            available,
            self.stats.snapshot()
        );
        for status in self.sessions() {
            trace!("{}: {}", self.port, status);
        }
    }
}

#[async_trait]
impl SessionDelegate for SessionPool {
    async fn shutdown_remote(&self, session: &Arc<ProxySession>) {
        let index = session.index();
        let mut state = self.lock();

        if session.is_dead() {
            let tracked = state
                .sessions
                .get(index)
                .map_or(false, |s| Arc::ptr_eq(s, session));
            if tracked {
                state.sessions.release(index);
                state.available.retain(|&i| i != index);
                debug!("{}: session {} is dead, slot freed", self.port, index);
            }
        } else if session.source_ready()
            && !session.is_attached()
            && self.is_active()
            && !state.available.contains(&index)
        {
            state.available.push_back(index);
            self.stats.record_released();
            debug!("{}: session {} added to available pool", self.port, index);
        }
    }
}
