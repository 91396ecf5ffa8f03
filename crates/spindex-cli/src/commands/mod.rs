//! CLI subcommands and the helpers they share

pub mod config;
pub mod sync;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use spindex_core::config::Config;
use spindex_graph::wait::CancellableWait;
use tracing::{info, warn};

/// Loads the configuration file and rejects it if it does not validate
///
/// # Errors
/// Fails when the file cannot be read or parsed, or when
/// [`Config::validate`] reports problems.
pub fn load_valid_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", messages.join("; "));
    }
    Ok(config)
}

/// Cancels `wait` on Ctrl+C or SIGTERM
///
/// Every backoff wait and walker sharing the handle stops promptly; the run
/// then ends as interrupted.
pub fn cancel_on_shutdown(wait: CancellableWait) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, stopping sync");
        wait.cancel_all();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
