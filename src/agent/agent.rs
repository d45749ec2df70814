//! Main agent structure
//!
//! Keeps one control channel to the relay alive, reconnecting after a fixed
//! delay whenever it is lost.

use super::control_channel::ControlChannel;
use crate::config::AgentConfig;
use crate::error::TunnelratError;
use crate::helper::ReconnectPolicy;
use crate::transport::Transport;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Whether an agent error means retrying is pointless
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TunnelratError>()
        .map_or(false, TunnelratError::is_fatal)
}

/// Main tunnelrat agent
#[derive(Debug)]
pub struct Agent<T: Transport> {
    /// Agent configuration
    config: AgentConfig,
    /// Transport layer
    transport: Arc<T>,
    /// Control channel currently in use
    channel: StdMutex<Option<Arc<ControlChannel<T>>>>,
}

impl<T: Transport> Agent<T> {
    /// Create a new agent with the given configuration
    pub fn new(config: AgentConfig) -> Result<Self> {
        let transport = T::new(&config.transport).context("Failed to set up transport")?;
        Ok(Agent::with_transport(config, transport))
    }

    /// Create an agent around an existing transport
    pub fn with_transport(config: AgentConfig, transport: T) -> Self {
        Agent {
            config,
            transport: Arc::new(transport),
            channel: StdMutex::new(None),
        }
    }

    /// Run the agent until shutdown or a fatal error
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!("Starting tunnelrat agent");
        info!("Relay: {}", self.config.remote_addr);
        info!(
            "Forwarding public port {} to {}",
            self.config.public_port, self.config.local_addr
        );

        let res = tokio::select! {
            res = self.run_forever() => res,
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping agent");
                Ok(())
            }
        };

        let channel = self.current_channel(None);
        if let Some(channel) = channel {
            channel.shutdown().await;
        }

        match res {
            Ok(()) => {
                info!("Agent stopped");
                Ok(())
            }
            Err(e) => {
                error!("Agent error: {:#}", e);
                Err(e)
            }
        }
    }

    async fn run_forever(&self) -> Result<()> {
        let mut policy = ReconnectPolicy::new(self.config.retry_delay());
        loop {
            let res = match ControlChannel::connect(self.config.clone(), self.transport.clone()).await
            {
                Ok((channel, reader)) => {
                    policy.reset();
                    self.current_channel(Some(channel.clone()));
                    let res = channel.run(reader).await;
                    self.current_channel(None);
                    res
                }
                Err(e) => Err(e),
            };

            match res {
                Ok(()) => warn!("Control channel lost"),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => warn!("Control channel error: {:#}", e),
            }

            let delay = policy.next_delay();
            info!(
                "Reconnecting in {:?}... (attempt {})",
                delay,
                policy.attempts()
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn current_channel(
        &self,
        channel: Option<Arc<ControlChannel<T>>>,
    ) -> Option<Arc<ControlChannel<T>>> {
        let mut current = self.channel.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *current, channel)
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
