mod commands;
mod config;
mod error;
mod fanout;
mod http_server;
mod platform;
mod procore;
mod reconcile;
#[cfg(test)]
mod testutil;
mod types;
mod webhook;

use config::{Config, PlatformConfig};
use fanout::Hub;
use http_server::AppState;
use platform::{PlatformClient, PlatformError};
use procore::{ProcoreBridge, ProcoreError};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("platform: {0}")]
    Platform(#[from] PlatformError),
    #[error("procore: {0}")]
    Procore(#[from] ProcoreError),
    #[error("HTTP server: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP server task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "ringrelay exiting");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    let platform = authenticate(config.platform.clone()).await?;

    let procore = match config.procore.clone() {
        Some(pc) => Some(Arc::new(ProcoreBridge::new(pc)?)),
        None => {
            info!("Procore variables not set, bridge routes disabled");
            None
        }
    };

    let state = AppState {
        platform,
        hub: Arc::new(Hub::new(config.ws_queue)),
        procore,
    };

    let (port, server) = http_server::start(&format!("0.0.0.0:{}", config.port), state).await?;
    info!("Server running at http://localhost:{port}");

    server.await?;
    Ok(())
}

/// Log in with the configured JWT and start one background reconciliation.
/// A rejected login ends startup before anything is bound.
async fn authenticate(config: PlatformConfig) -> Result<Arc<PlatformClient>, StartupError> {
    let platform = Arc::new(PlatformClient::new(config)?);
    if let Err(e) = platform.login().await {
        error!(error = %e, "unable to authenticate to platform, check credentials");
        return Err(e.into());
    }

    // Failures here are only logged.
    let reconciler = platform.clone();
    tokio::spawn(async move {
        reconcile::run_once(&reconciler).await;
    });
    Ok(platform)
}
