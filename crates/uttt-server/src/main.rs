//! uttt-server binary: loads config, seeds the in-memory store, and serves
//! until SIGINT or SIGTERM.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uttt_server::{GameServer, MemoryStore, ServerConfig, UltimateTicTacToe};

/// uttt-server, Ultimate Tic-Tac-Toe session server
#[derive(Parser, Debug)]
#[command(name = "uttt-server", version, about = "Ultimate Tic-Tac-Toe session server")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.uttt/config.toml")]
    config: String,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Idle timeout in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log every request at info level
    #[arg(long)]
    request_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting uttt-server");

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(
        Some(&config_path),
        cli.bind,
        cli.port,
        cli.idle_timeout,
        cli.request_logs,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if config.players.is_empty() {
        info!("no players configured, every login will be rejected");
    }
    let store = Arc::new(MemoryStore::with_players(&config.players));
    let engine = Arc::new(UltimateTicTacToe);

    let handle = match GameServer::new(config, store, engine).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    handle
        .run_until(async {
            shutdown_signal().await;
            info!("received shutdown signal");
        })
        .await;

    info!("uttt-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
