//! agentmux daemon
//!
//! Runs agent sessions as subprocesses and serves the WebSocket control
//! channel that lists, drives and streams them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use agentmux_core::config::{LoadedConfig, load_config};
use agentmux_daemon::server::{BroadcastHub, ServerConfig, serve};
use agentmux_daemon::session::SessionRegistry;

#[derive(Parser, Debug)]
#[command(name = "agentmux-daemon")]
#[command(version, about = "agentmux daemon - agent session multiplexer")]
struct Args {
    /// Settings file (defaults to the per-user settings.json)
    #[arg(long, env = "AGENTMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind the control channel to
    #[arg(long)]
    host: Option<String>,

    /// Control channel port
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "AGENTMUX_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let LoadedConfig {
        mut config,
        rejected,
    } = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.daemon.bind_host = host;
    }
    if let Some(port) = args.port {
        config.daemon.ws_port = port;
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }

    agentmux_core::tracing_init::init_tracing(&config.daemon.log_level, args.log_json);
    for problem in &rejected {
        warn!(error = %problem, "Ignoring configuration value");
    }

    let server_config = ServerConfig::from_daemon(&config.daemon)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %server_config.addr,
        "Starting agentmux-daemon"
    );

    let (registry, events) = SessionRegistry::new(config.sessions.clone());
    let registry = Arc::new(registry);
    let hub = Arc::new(BroadcastHub::new(
        Arc::clone(&registry),
        server_config.client_queue_capacity,
    ));
    let events_task = tokio::spawn(Arc::clone(&hub).run_events(events));

    let listener = TcpListener::bind(server_config.addr).await?;
    info!(
        ws_port = config.daemon.ws_port,
        web_port = config.daemon.web_port,
        "Control channel ready at ws://{}",
        listener.local_addr()?
    );

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let shutdown_registry = Arc::clone(&registry);
    let shutdown_hub = Arc::clone(&hub);
    let shutdown = async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }

        let killed = shutdown_registry.kill_all().await;
        info!(sessions = killed, "Killed all sessions");
        shutdown_hub.close().await;
    };

    serve(listener, hub, shutdown).await?;

    events_task.abort();
    info!("Daemon stopped");
    Ok(())
}
