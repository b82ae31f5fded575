//! Librarian Daemon - Think session server
//!
//! Answers Think streams: issues search directives and selects evidence
//! from the results the Requester sends back.

use anyhow::{Context, Result};
use clap::Parser;
use librariand::{config::Config, logging, server, status, LibrarianService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "librariand", version)]
#[command(about = "Think session server")]
struct Args {
    /// Config file (default: $LIBRARIAN_CONFIG or /etc/librarian/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides bind_address from config
    #[arg(long)]
    bind: Option<String>,

    /// Listen port, overrides port from config
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    logging::init(&config.log_level);
    info!("Librarian Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);

    let listener = server::bind(&config).await?;
    let status_listener = match &config.status_bind {
        Some(addr) => Some(
            tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind status endpoint {}", addr))?,
        ),
        None => None,
    };

    let service = Arc::new(LibrarianService::new(config));
    let stop_status = CancellationToken::new();

    let status_task = status_listener.map(|listener| {
        let service = Arc::clone(&service);
        let stop = stop_status.clone();
        tokio::spawn(async move {
            status::serve_status(listener, service, async move { stop.cancelled().await })
                .await
        })
    });

    server::serve(listener, service, shutdown_signal()).await?;
    stop_status.cancel();

    if let Some(task) = status_task {
        task.await.context("Status task panicked")??;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
