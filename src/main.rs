//! Pod circuit breaker controller.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────── POD BREAKER ────────────────────────────┐
//!   │                                                                      │
//!   │  metric source ──▶ ┌──────────┐  cut (traffic=no)                    │
//!   │  custom verdict ─▶ │ breaker  │─────────────────┐                    │
//!   │                    └──────────┘                 ▼                    │
//!   │                                          ┌─────────────┐             │
//!   │                    ┌──────────┐  yes /   │  pod labels │◀── LB only  │
//!   │                    │activator │─pause/──▶│ annotations │   routes    │
//!   │                    └──────────┘  delete  └─────────────┘  traffic=yes│
//!   │                    ┌──────────┐  strip          ▲                    │
//!   │                    │    gc    │─────────────────┘                    │
//!   │                    └──────────┘                                      │
//!   │                                                                      │
//!   │  config ── supervisor (one task per component) ── lifecycle          │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use pod_breaker::config::{load_config, watcher::ConfigWatcher, ControllerConfig};
use pod_breaker::lifecycle::signals::{SignalEvent, Signals};
use pod_breaker::lifecycle::startup::build_collaborators;
use pod_breaker::observability::{logging, metrics};
use pod_breaker::{ServiceSupervisor, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "pod-breaker", version, about = "Metric-driven pod circuit breaker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "pod-breaker.toml")]
    config: PathBuf,

    /// Reload the configuration when the file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        services = config.services.len(),
        "pod-breaker starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    let collaborators = build_collaborators(&config)?;
    let mut supervisor = ServiceSupervisor::new(collaborators, shutdown.subscribe());
    for e in supervisor.reconcile(&config).await {
        tracing::warn!(error = %e, "Component disabled");
    }

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    let _watcher = if cli.watch { Some(watcher.run()?) } else { None };

    let mut signals = Signals::register()?;
    loop {
        tokio::select! {
            Some(new_config) = updates.recv() => {
                tracing::info!("Applying reloaded configuration");
                apply(&mut supervisor, &new_config).await;
            }
            event = signals.recv() => match event {
                SignalEvent::Shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                SignalEvent::Reload => match load_config(&cli.config) {
                    Ok(new_config) => {
                        tracing::info!("Reloading configuration on SIGHUP");
                        apply(&mut supervisor, &new_config).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Reload failed. Keeping current configuration."
                        );
                    }
                },
            },
        }
    }

    shutdown.trigger();
    supervisor.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn apply(supervisor: &mut ServiceSupervisor, config: &ControllerConfig) {
    match supervisor.reload(config).await {
        Ok(errors) => {
            for e in errors {
                tracing::warn!(error = %e, "Component disabled");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Reload failed. Keeping current configuration.");
        }
    }
}
