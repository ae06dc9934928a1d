// src/main.rs
//! Polyglot Host
//!
//! Loads the host configuration, brings up an interpreter-backed runtime for
//! every enabled language, and serves until interrupted.

use anyhow::{Context, Result};
use polyglot_host::observability::{init_metrics, init_tracing};
use polyglot_host::runtime::{Language, ProcessRuntime};
use polyglot_host::{BuildInfo, HostConfig, Orchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize observability (tracing, metrics)
    init_tracing()?;
    init_metrics()?;

    let build = BuildInfo::current();
    info!("Starting polyglot host v{} ({})", build.version, build.git_hash);

    // Load configuration
    let config = HostConfig::load().context("failed to load configuration")?;
    info!("Configuration loaded for {}", config.app.name);

    let orchestrator = Arc::new(Orchestrator::new(config)?);

    for (name, _) in orchestrator.config().enabled_runtimes() {
        match Language::from_name(name) {
            Some(language) if language.name() == name.as_str() => {
                orchestrator.register_runtime(Arc::new(ProcessRuntime::new(language)))?;
            }
            _ => warn!("No built-in adapter for runtime {}", name),
        }
    }

    let cancel = CancellationToken::new();

    if let Err(e) = orchestrator.initialize(&cancel).await {
        error!("Initialization failed: {}", e);
        if let Err(shutdown_err) = orchestrator.shutdown(&cancel).await {
            error!("{}", shutdown_err);
        }
        return Err(e.into());
    }

    info!("Runtimes ready: {:?}", orchestrator.runtimes());

    // Graceful shutdown handler
    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal, cleaning up...");

    cancel.cancel();
    let shutdown = CancellationToken::new();
    match orchestrator.shutdown(&shutdown).await {
        Ok(()) => {
            info!("Host stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Shutdown error: {}", e);
            Err(e.into())
        }
    }
}
