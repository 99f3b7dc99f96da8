//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the reconciler and the watchers together, and the probe server
//! next to them.
//!
//! The controller manages three kinds:
//! - Node: labels Nodes that have an external address
//! - Pod: publishes the IP of Running load-balancer pods
//! - Service: owns the load-balancer Deployment of each LoadBalancer Service

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crate::watcher::{WatchContext, Watcher};
use cluster_store::KubeStore;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main controller for LoadBalancer Services.
pub struct Controller {
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
    probe_state: Arc<ProbeState>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing easylb controller");

        let kube_client = Client::try_default().await?;

        let metrics = Arc::new(Metrics::new()?);
        let probe_state = Arc::new(ProbeState::new(metrics.clone()));
        let probe_server = {
            let state = probe_state.clone();
            let shutdown = shutdown.clone();
            let addr = config.metrics_addr;
            tokio::spawn(async move { server::serve(addr, state, shutdown).await })
        };

        let reconciler = Reconciler::new(
            Box::new(KubeStore::new(kube_client.clone())),
            &config,
            shutdown.clone(),
        );
        let ctx = Arc::new(WatchContext::new(Arc::new(reconciler), metrics));
        let watcher_instance = Arc::new(Watcher::new(kube_client, ctx, &config, shutdown));

        // Start all watchers in background tasks
        let node_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_nodes().await })
        };
        let pod_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_pods().await })
        };
        let service_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_services().await })
        };

        Ok(Self {
            node_watcher,
            pod_watcher,
            service_watcher,
            probe_server,
            probe_state,
        })
    }

    /// Runs until every watcher has stopped, or fails as soon as one of them
    /// or the probe server fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("easylb controller running");
        self.probe_state.set_ready(true);

        // Watchers only return on shutdown, so the first one back means the
        // token has fired; drain the rest before leaving.
        let (finished, first) = tokio::select! {
            result = &mut self.node_watcher => ("Node", join_result("Node", result)),
            result = &mut self.pod_watcher => ("Pod", join_result("Pod", result)),
            result = &mut self.service_watcher => ("Service", join_result("Service", result)),
            result = &mut self.probe_server => ("probe server", join_result("probe server", result)),
        };
        self.probe_state.set_ready(false);
        first?;

        for (what, handle) in [
            ("Node", self.node_watcher),
            ("Pod", self.pod_watcher),
            ("Service", self.service_watcher),
            ("probe server", self.probe_server),
        ] {
            if what != finished {
                join_result(what, handle.await)?;
            }
        }

        info!("easylb controller stopped");
        Ok(())
    }
}

fn join_result(
    what: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result.map_err(|e| ControllerError::Watch(format!("{what} task panicked: {e}")))?
}
