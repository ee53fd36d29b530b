//! Chainwatch exporter binary.
//!
//! Polls the configured Bitcoin and/or Ethereum nodes and serves the
//! resulting metrics:
//!
//! - `GET /metrics`
//! - `GET /health`
//!
//! Configuration comes from CLI flags or environment variables (see
//! `--help`). Invalid configuration and listener bind failures exit
//! non-zero before any node is polled.

mod cli;

use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chainwatch::{Exporter, MetricsRegistry, MetricsServer};
use cli::Cli;

const DEFAULT_LOG_FILTER: &str = "chainwatch=info,chainwatch_exporter=info";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    config.validate().context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let metrics = Arc::new(
        MetricsRegistry::new(config.expose_timestamps)
            .context("failed to initialise metrics registry")?,
    );

    // Bind first: a taken port must fail before any source starts.
    let server = MetricsServer::bind(config.listen_addr, metrics.clone()).await?;

    let shutdown = CancellationToken::new();
    let exporter = Exporter::start(&config, metrics, shutdown.clone())?;
    let server_task = tokio::spawn(server.serve(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    exporter.join().await;
    server_task.await.context("metrics server task failed")?;
    tracing::info!("exporter stopped");
    Ok(())
}

/// Waits for Ctrl-C (or SIGTERM on unix) and returns, used for graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = on_signal("ctrl-c", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(signal = "sigterm", error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Resolves once `signal` fires. A handler that could not be installed is
/// logged and never resolves, leaving shutdown to the other signals.
async fn on_signal(name: &'static str, signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::warn!(signal = name, error = %e, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}
