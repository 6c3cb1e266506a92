//! Parley Relay Server
//!
//! A standalone signaling relay: clients join a room over WebSocket and the
//! relay forwards their JSON messages to the rest of the room or to one peer.

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::DEFAULT_WS_PORT;
use parley_hub::{OverflowPolicy, Server, ServerConfig, ShutdownOutcome};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "parley-relay")]
#[command(about = "Room-based WebSocket signaling relay")]
#[command(version)]
struct Cli {
    /// Listen address [default: 0.0.0.0:8080]
    #[arg(short, long, env = "PARLEY_LISTEN")]
    listen: Option<String>,

    /// WebSocket upgrade path [default: /ws]
    #[arg(long)]
    path: Option<String>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for sessions to close on shutdown
    #[arg(long)]
    grace_period: Option<u64>,

    /// Outbound queue capacity per session
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// What to do when a session's queue is full: drop_newest, disconnect or wait
    #[arg(long, value_parser = parse_overflow)]
    overflow: Option<OverflowPolicy>,

    /// Refuse a second connection with the same username in a room
    #[arg(long)]
    unique_ids: bool,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Config file layout
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RelayConfig {
    listen: String,
    server: ServerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", DEFAULT_WS_PORT),
            server: ServerConfig::default(),
        }
    }
}

fn parse_overflow(s: &str) -> std::result::Result<OverflowPolicy, String> {
    match s {
        "drop_newest" | "drop-newest" => Ok(OverflowPolicy::DropNewest),
        "disconnect" => Ok(OverflowPolicy::Disconnect),
        "wait" => Ok(OverflowPolicy::Wait),
        other => Err(format!(
            "unknown overflow policy '{}' (expected drop_newest, disconnect or wait)",
            other
        )),
    }
}

fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

/// File values first, then CLI flags on top
fn resolve_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => RelayConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(path) = &cli.path {
        config.server.websocket.path = path.clone();
    }
    if let Some(secs) = cli.grace_period {
        config.server.grace_period_ms = secs.saturating_mul(1000);
    }
    if let Some(capacity) = cli.queue_capacity {
        config.server.hub.session_queue_capacity = capacity;
    }
    if let Some(overflow) = cli.overflow {
        config.server.hub.overflow = overflow;
    }
    if cli.unique_ids {
        config.server.hub.unique_client_ids = true;
    }
    if let Some(max) = cli.max_sessions {
        config.server.max_sessions = max;
    }

    config.server.hub.validate()?;
    Ok(config)
}

fn setup_logging(verbose: bool, json: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.json_logs)?;

    let config = resolve_config(&cli)?;
    info!("Starting Parley relay");
    info!(
        "Listening on {}{} (queue {}, overflow {:?}, grace {} ms)",
        config.listen,
        config.server.websocket.path,
        config.server.hub.session_queue_capacity,
        config.server.hub.overflow,
        config.server.grace_period_ms
    );

    let server = Server::new(config.server)?;
    let shutdown = tokio::spawn(server.shutdown_coordinator().run(shutdown_signal()));

    server
        .serve_websocket(&config.listen)
        .await
        .with_context(|| format!("Failed to serve on {}", config.listen))?;

    match shutdown.await? {
        ShutdownOutcome::Drained { sessions_closed } => {
            info!("Relay stopped, {} sessions closed cleanly", sessions_closed);
        }
        ShutdownOutcome::Forced { remaining } => {
            warn!("Relay stopped, {} sessions were aborted", remaining);
        }
    }

    Ok(())
}
