//! Chat streaming relay.
//!
//! Serves `POST /api/stream-chat`, relaying LLM completions (or mock
//! replies for testing) to HTTP clients as they are generated.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! chat-relay config/relay.toml
//!
//! # With environment variables
//! OPENAI_API_KEY=sk-... RELAY_BACKEND_PROVIDER=openai chat-relay
//!
//! # Mock backend on another port
//! chat-relay --backend mock --listen 127.0.0.1:8080
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chat_relay::{
    backend::create_backend,
    config::{Config, LoggingConfig},
    flow::ConfigFlowStore,
    metrics::{init_metrics, start_metrics_server},
    server::{self, AppState},
    shutdown::ShutdownCoordinator,
};

/// Streaming relay between chat clients and an LLM provider.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override backend provider (mock, openai).
    #[arg(short, long)]
    backend: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_ref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(backend) = args.backend {
        config.backend.provider = backend;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        backend = %config.backend.provider,
        framing = ?config.server.framing,
        max_streams = config.server.max_streams,
        "Starting chat relay"
    );

    init_metrics();

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr)?;
    }

    let backend = create_backend(&config.backend)?;
    tracing::info!(backend = backend.name(), "Backend initialized");

    let flows = Arc::new(ConfigFlowStore::new(&config.flows));
    let shutdown = ShutdownCoordinator::new(config.server.max_streams);
    let state = AppState::new(&config, backend, flows, shutdown.clone());

    let listener = server::bind(&config.server.listen_addr).await?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signals).await {
            tracing::error!(error = %e, "Signal handling failed");
        }
    });

    server::serve(listener, state).await?;

    tracing::info!(
        active = shutdown.active_streams(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for streams to drain"
    );

    let drain_result =
        tokio::time::timeout(config.server.shutdown_timeout(), shutdown.wait_for_drain()).await;

    match drain_result {
        Ok(()) => {
            tracing::info!("All streams drained");
        }
        Err(_) => {
            tracing::warn!(
                active = shutdown.active_streams(),
                "Shutdown timeout reached, forcing exit"
            );
        }
    }

    tracing::info!("Relay stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Handle Unix signals.
async fn handle_signals(shutdown: ShutdownCoordinator) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_streams = shutdown.active_streams(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }

    Ok(())
}
