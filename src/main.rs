//! socks5-proxy - standalone SOCKS5 proxy
//!
//! Accepts SOCKS5 clients, optionally requires a static username/password,
//! and relays `connect` requests directly to their destinations.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use socks5_proxy::config::{self, Config, CredentialsConfig};
use socks5_proxy::{Listener, Result, Socks5Error, Socks5Server};

#[derive(Parser)]
#[command(name = "socks5-proxy")]
#[command(version)]
#[command(about = "SOCKS5 proxy with optional username/password authentication")]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Require this username (needs --password)
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Require this password (needs --username)
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so its level can apply
    let mut config = match cli.config {
        Some(ref path) => config::load_config(path)?,
        None => {
            let mut config = Config::default();
            config::apply_env_overrides(&mut config);
            config
        }
    };

    // Priority: --verbose flag, then RUST_LOG env var, then configured level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting socks5-proxy v{}", env!("CARGO_PKG_VERSION"));
    if let Some(ref path) = cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.server.listen_address = addr;
    }
    if let Some(port) = cli.listen_port {
        config.server.listen_port = port;
    }
    if let (Some(username), Some(password)) = (cli.username, cli.password) {
        config.auth = Some(CredentialsConfig { username, password });
    }
    config.validate().map_err(Socks5Error::Config)?;

    let server = Socks5Server::from_config(&config);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let listener = Listener::bind(&config.server, server, shutdown_rx).await?;
    let stats = listener.stats();

    info!(
        "Proxy ready: listening on {} ({}, commands: {:?})",
        listener.local_addr()?,
        if config.has_credentials() {
            "username/password auth"
        } else {
            "no auth"
        },
        config.supported_commands
    );

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = listener_handle.await;

    info!(
        "Shutdown complete. Total connections handled: {}, rejected: {}",
        stats.connections_accepted.load(Ordering::Relaxed),
        stats.connections_rejected.load(Ordering::Relaxed)
    );

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
