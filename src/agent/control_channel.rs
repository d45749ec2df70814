//! Agent control channel
//!
//! One control channel registers the public port with the relay and then
//! follows its commands: `C<index>` opens (or reuses) the tunnel leg for a
//! session and splices it to a fresh connection to the local service.
//! Sessions report back with `S<index>` whenever they go idle.
//!
//! Commands are served one at a time in arrival order, so a `T<index>`
//! always finds the session its preceding `C<index>` opened.

use super::data_channel::{connect_local, open_data_leg};
use crate::config::AgentConfig;
use crate::error::TunnelratError;
use crate::protocol::{read_command, write_command, Command, ControlSender};
use crate::session::{AttachError, ProxySession, SessionDelegate};
use crate::transport::{AddrMaybeCached, BoxedStream, SocketOpts, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use tokio::io::ReadHalf;
use tracing::{debug, info, trace, warn};

/// Control channel to the relay for one public port
#[derive(Debug)]
pub struct ControlChannel<T: Transport> {
    config: AgentConfig,
    transport: Arc<T>,
    remote_addr: AddrMaybeCached,
    control: ControlSender,
    sessions: StdMutex<HashMap<u32, Arc<ProxySession>>>,
}

impl<T: Transport> ControlChannel<T> {
    /// Connect to the relay and request the configured public port
    pub async fn connect(
        config: AgentConfig,
        transport: Arc<T>,
    ) -> Result<(Arc<Self>, ReadHalf<BoxedStream>)> {
        let remote_addr = AddrMaybeCached::new(&config.remote_addr);
        info!("Connecting to relay: {}", config.remote_addr);

        let conn = transport
            .connect(&remote_addr, SocketOpts::for_control_channel())
            .await
            .context("Failed to connect to relay")?;
        let mut conn: BoxedStream = Box::new(conn);
        write_command(&mut conn, &Command::Connect(u32::from(config.public_port)))
            .await
            .context("Failed to request public port")?;
        info!("Control channel established, public port {}", config.public_port);

        let (reader, writer) = tokio::io::split(conn);
        let channel = Arc::new(ControlChannel {
            config,
            transport,
            remote_addr,
            control: ControlSender::new(writer),
            sessions: StdMutex::new(HashMap::new()),
        });
        Ok((channel, reader))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<ProxySession>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Follow relay commands until the channel is lost
    ///
    /// Returns `Ok` when the relay closed the channel and an error when it
    /// went silent or refused the public port. Every session of the channel
    /// is shut down before returning.
    pub async fn run(self: &Arc<Self>, mut reader: ReadHalf<BoxedStream>) -> Result<()> {
        let res = self.command_loop(&mut reader).await;
        self.shutdown().await;
        res
    }

    async fn command_loop(self: &Arc<Self>, reader: &mut ReadHalf<BoxedStream>) -> Result<()> {
        let idle = self.config.heartbeat_timeout();
        loop {
            let cmd = match tokio::time::timeout(idle, read_command(reader)).await {
                Err(_) => {
                    return Err(TunnelratError::Timeout(format!(
                        "no control traffic for {:?}",
                        idle
                    ))
                    .into())
                }
                Ok(Ok(cmd)) => cmd,
                Ok(Err(TunnelratError::MalformedCommand(_))) => continue,
                Ok(Err(TunnelratError::ControlClosed)) => {
                    info!("Control channel closed by relay");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e).context("Control channel read failed"),
            };

            match cmd {
                Command::Connect(index) => {
                    debug!("Received open request for session {}", index);
                    if let Err(e) = self.open_session(index).await {
                        warn!("Session {}: {:#}", index, e);
                    }
                }
                Command::Terminate(index) => {
                    debug!("Received terminate for session {}", index);
                    let session = self.lock().get(&index).cloned();
                    if let Some(session) = session {
                        session.shutdown().await;
                    }
                }
                Command::Heartbeat => {
                    trace!("Heartbeat received");
                    self.control
                        .send(Command::Heartbeat)
                        .await
                        .context("Failed to answer heartbeat")?;
                }
                Command::PortUnavailable => {
                    return Err(TunnelratError::PortUnavailable(self.config.public_port).into());
                }
                other => warn!("Unexpected command {}", other),
            }
        }
    }

    /// Serve `C<index>`: splice the session's leg to the local service
    ///
    /// An idle session is reused; otherwise a new leg is opened. If the
    /// local service cannot be reached the session is refused so the relay
    /// releases its public peer and gets the leg back.
    pub async fn open_session(self: &Arc<Self>, index: u32) -> Result<()> {
        let mut retried = false;
        loop {
            let existing = self.session(index);
            let session = match existing {
                Some(session) => session,
                None => self.new_session(index).await?,
            };

            let local = match connect_local(&self.config).await {
                Ok(local) => local,
                Err(e) => {
                    warn!("Session {}: {:#}", index, e);
                    if let Err(e) = session.refuse().await {
                        session.shutdown().await;
                        return Err(e.into());
                    }
                    return Ok(());
                }
            };

            match session.attach(local).await {
                Ok(()) => return Ok(()),
                Err(AttachError { error, .. }) if !retried => {
                    warn!("{}, opening a new leg", error);
                    session.shutdown().await;
                    retried = true;
                }
                Err(AttachError { error, .. }) => return Err(error.into()),
            }
        }
    }

    /// Open a new tunnel leg and track it as session `index`
    pub async fn new_session(self: &Arc<Self>, index: u32) -> Result<Arc<ProxySession>> {
        let leg = open_data_leg(
            self.transport.as_ref(),
            &self.remote_addr,
            self.config.public_port,
        )
        .await?;

        let weak = Arc::downgrade(self);
        let delegate: Weak<dyn SessionDelegate> = weak;
        let session = ProxySession::new(index, leg, delegate);
        let replaced = self.lock().insert(index, session.clone());
        if let Some(old) = replaced {
            old.shutdown().await;
        }
        info!("Opened tunnel leg for session {}", index);
        Ok(session)
    }

    fn session(&self, index: u32) -> Option<Arc<ProxySession>> {
        self.lock().get(&index).filter(|s| !s.is_dead()).cloned()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Close the control channel and every session
    pub async fn shutdown(&self) {
        self.control.close().await;
        let sessions: Vec<Arc<ProxySession>> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
        debug!("Control channel shut down");
    }
}

#[async_trait]
impl<T: Transport> SessionDelegate for ControlChannel<T> {
    async fn shutdown_remote(&self, session: &Arc<ProxySession>) {
        let index = session.index();
        if session.is_dead() {
            let mut sessions = self.lock();
            if sessions.get(&index).map_or(false, |s| Arc::ptr_eq(s, session)) {
                sessions.remove(&index);
                debug!("Session {} forgotten", index);
            }
            return;
        }

        if let Err(e) = self.control.send(Command::Release(index)).await {
            debug!("Could not release session {}: {}", index, e);
        }
    }
}
