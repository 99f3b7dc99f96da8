//! easylb Controller
//!
//! Turns every Service of type LoadBalancer into a single-replica
//! load-balancer Deployment in `easylb-system` and publishes the address it
//! is reachable on as the Service ingress:
//! - Service: owns the load-balancer Deployment and the Service finalizer
//! - Pod: republishes the address when a load-balancer pod moves
//! - Node: labels Nodes that have an external address

mod backoff;
mod config;
mod constants;
mod controller;
mod error;
mod metrics;
mod readiness;
mod reconciler;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;
mod workload;

use crate::config::Config;
use anyhow::Context;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting easylb controller");

    let config = Config::from_env().context("failed to load configuration")?;
    info!("Configuration:");
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Rollout poll interval: {:?}", config.rollout_poll_interval);
    info!("  Rollout timeout: {:?}", config.rollout_timeout);
    info!("  Concurrency: {}", config.concurrency);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown().await;
            shutdown.cancel();
        }
    });

    let controller = Controller::new(config, shutdown.clone())
        .await
        .context("failed to start controller")?;
    let result = controller.run().await;
    shutdown.cancel();
    result.context("controller failed")?;

    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                info!("Received SIGINT, shutting down");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}
