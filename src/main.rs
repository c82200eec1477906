#![forbid(unsafe_code)]

//! `remote-eval` — remote script execution server binary.
//!
//! Bootstraps configuration, starts the TCP listener, and runs until a
//! shutdown signal arrives, then stops the listener gracefully.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use remote_eval::config::ServerConfig;
use remote_eval::engine::{ExecutionEngine, ProcessEngine};
use remote_eval::server::listener::Listener;
use remote_eval::{AppError, Result};

/// Grace period granted to active sessions on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "remote-eval", about = "Remote script execution server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured TCP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("remote-eval server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = ServerConfig::load_from_path(&args.config)?;

    if let Some(port) = args.port {
        config.port = port;
    }

    // Token required but not configured: generate one for this server
    // instance and log it, so local clients can pick it up.
    if config.require_token && config.token.is_none() {
        let token = uuid::Uuid::new_v4().to_string();
        info!(%token, "generated session token");
        config.token = Some(token);
    }

    info!("configuration loaded");

    // ── Start the listener ──────────────────────────────
    let engine: Arc<dyn ExecutionEngine> = Arc::new(ProcessEngine::from_config(&config.engine));
    let listener = Listener::start(config, engine).await?;
    info!(addr = %listener.local_addr(), "server ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    listener.stop(SHUTDOWN_GRACE).await;
    info!("remote-eval shut down");

    Ok(())
}

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
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
