//! Tunnelrat - Reverse TCP Tunnel
//!
//! This is the main entry point for the Tunnelrat relay and agent.

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use tunnelrat::agent::{is_fatal, run_agent};
use tunnelrat::config::{load_config, AgentConfig, Config, RelayConfig};
use tunnelrat::relay::run_relay;
use tunnelrat::transport::AddrMaybeCached;
use tunnelrat::TunnelratError;

/// Exit status for usage errors and a refused public port
const USAGE_EXIT_CODE: i32 = 999;

/// Tunnelrat - expose a service behind NAT through a public relay
#[derive(Parser, Debug)]
#[command(name = "tunnelrat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept agents on rendezvous ports and expose their public ports
    Relay {
        /// Rendezvous ports (override the config file)
        ports: Vec<u16>,
    },
    /// Expose a local service through a relay
    Agent {
        /// Relay host
        remote_host: Option<String>,
        /// Relay rendezvous port
        remote_port: Option<u16>,
        /// Public port to request on the relay
        public_port: Option<u16>,
        /// Local service host
        local_host: Option<String>,
        /// Local service port
        local_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(USAGE_EXIT_CODE);
            }
        },
    };

    // Setup logging
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    setup_logging(level, args.json_log)?;

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    info!("Tunnelrat v{}", tunnelrat::VERSION);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx_clone.send(true);
    });

    match args.mode {
        Mode::Relay { ports } => {
            let relay = match relay_config(config.relay, ports) {
                Ok(relay) => relay,
                Err(e) => usage_error(e),
            };
            info!("Rendezvous ports: {:?}", relay.ports);
            run_relay(relay, shutdown_rx).await
        }
        Mode::Agent {
            remote_host,
            remote_port,
            public_port,
            local_host,
            local_port,
        } => {
            let overrides = AgentOverrides {
                remote_host,
                remote_port,
                public_port,
                local_host,
                local_port,
            };
            let agent = match agent_config(config.agent, overrides) {
                Ok(agent) => agent,
                Err(e) => usage_error(e),
            };
            match run_agent(agent, shutdown_rx).await {
                Err(e) if is_fatal(&e) => {
                    error!("{:#}", e);
                    std::process::exit(USAGE_EXIT_CODE);
                }
                res => res,
            }
        }
    }
}

fn usage_error(e: anyhow::Error) -> ! {
    eprintln!("error: {:#}", e);
    std::process::exit(USAGE_EXIT_CODE);
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
            }
            Err(e) => {
                error!("Failed to setup SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Merge rendezvous ports from the command line into the relay section
fn relay_config(config: Option<RelayConfig>, ports: Vec<u16>) -> Result<RelayConfig> {
    let mut config = config.unwrap_or_default();
    if !ports.is_empty() {
        config.ports = ports;
    }
    config
        .validate()
        .map_err(|e| TunnelratError::Config(format!("relay: {}", e)))?;
    Ok(config)
}

#[derive(Debug, Default)]
struct AgentOverrides {
    remote_host: Option<String>,
    remote_port: Option<u16>,
    public_port: Option<u16>,
    local_host: Option<String>,
    local_port: Option<u16>,
}

/// Merge positional agent arguments into the agent section
fn agent_config(config: Option<AgentConfig>, overrides: AgentOverrides) -> Result<AgentConfig> {
    let mut config = config.unwrap_or_default();
    if let (Some(host), Some(port)) = (&overrides.remote_host, overrides.remote_port) {
        config.remote_addr = AddrMaybeCached::from_host_port(host, port).addr().to_string();
    }
    if let Some(port) = overrides.public_port {
        config.public_port = port;
    }
    if let (Some(host), Some(port)) = (&overrides.local_host, overrides.local_port) {
        config.local_addr = AddrMaybeCached::from_host_port(host, port).addr().to_string();
    }
    config
        .validate()
        .map_err(|e| TunnelratError::Config(format!("agent: {}", e)))?;
    Ok(config)
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
