//! Kubernetes resource watchers.
//!
//! This module handles watching Kubernetes resources for changes
//! and triggering reconciliation using kube_runtime::Controller.
//!
//! All watchers go through a generic `watch_resource()` helper that owns the
//! reconcile loop: debounce, concurrency limit, per-object Fibonacci
//! requeue on error, metrics and graceful shutdown.

use crate::backoff::FibonacciBackoff;
use crate::config::Config;
use crate::constants::{LOAD_BALANCER_FOR_NAME_ANNOTATION, LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION, NAMESPACE};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::{Api, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<(), ControllerError>> + Send>>;

/// Shared state handed to every reconcile and error-policy invocation.
pub struct WatchContext {
    pub(crate) reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    /// Requeue backoff per object (`kind/namespace/name`), dropped on success
    backoff_states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl WatchContext {
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) -> Self {
        Self {
            reconciler,
            metrics,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    fn next_backoff(&self, key: &str) -> Duration {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .next_backoff()
    }

    fn reset_backoff(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

fn object_key<K: kube::Resource>(resource_name: &str, obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{resource_name}/{ns}/{}", obj.name_any()),
        None => format!("{resource_name}/{}", obj.name_any()),
    }
}

/// Generic watcher helper that runs a kube_runtime::Controller to completion.
///
/// The Controller reconnects its watches, so this only returns once
/// `shutdown` is cancelled. `reconcile_fn` receives the reconciler and the
/// triggering object; success waits for the next change.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    ctx: Arc<WatchContext>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
    shutdown: CancellationToken,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<WatchContext>| {
        let key = object_key(resource_name, &*obj);
        let delay = ctx.next_backoff(&key);
        warn!("Reconciliation of {} failed, requeue in {:?}: {}", key, delay, error);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<WatchContext>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(resource_name, &*obj);
            debug!("Reconciling {}", key);

            let started = Instant::now();
            let result = reconcile_fn(ctx.reconciler.clone(), obj).await;
            let outcome = match &result {
                Ok(()) => "success",
                Err(e) => e.kind(),
            };
            ctx.metrics.observe(resource_name, outcome, started.elapsed());

            match result {
                Ok(()) => {
                    ctx.reset_backoff(&key);
                    Ok(Action::await_change())
                }
                Err(e) => {
                    error!("Reconciliation failed for {}: {}", key, e);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches bursts of events for the same object
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    controller
        .with_config(controller_config)
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Maps a managed Deployment back to the Service it serves.
fn owning_service(deployment: &Deployment) -> Option<ObjectRef<Service>> {
    let annotations = deployment.metadata.annotations.as_ref()?;
    let namespace = annotations.get(LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION)?;
    let name = annotations.get(LOAD_BALANCER_FOR_NAME_ANNOTATION)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Watches Nodes, Pods and Services for changes.
pub struct Watcher {
    ctx: Arc<WatchContext>,
    node_api: Api<Node>,
    pod_api: Api<Pod>,
    service_api: Api<Service>,
    deployment_api: Api<Deployment>,
    concurrency: u16,
    shutdown: CancellationToken,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: kube::Client, ctx: Arc<WatchContext>, config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            node_api: Api::all(client.clone()),
            pod_api: Api::all(client.clone()),
            service_api: Api::all(client.clone()),
            deployment_api: Api::namespaced(client, NAMESPACE),
            concurrency: config.concurrency,
            shutdown,
        }
    }

    /// Starts watching Node resources.
    pub async fn watch_nodes(&self) -> Result<(), ControllerError> {
        watch_resource(
            Controller::new(self.node_api.clone(), watcher::Config::default()),
            self.ctx.clone(),
            |reconciler, node: Arc<Node>| {
                Box::pin(async move { reconciler.reconcile_node(&node.name_any()).await })
            },
            "node",
            self.concurrency,
            self.shutdown.clone(),
        )
        .await
    }

    /// Starts watching Pod resources.
    pub async fn watch_pods(&self) -> Result<(), ControllerError> {
        watch_resource(
            Controller::new(self.pod_api.clone(), watcher::Config::default()),
            self.ctx.clone(),
            |reconciler, pod: Arc<Pod>| {
                Box::pin(async move {
                    let namespace = pod.namespace().unwrap_or_default();
                    reconciler.reconcile_pod(&namespace, &pod.name_any()).await
                })
            },
            "pod",
            self.concurrency,
            self.shutdown.clone(),
        )
        .await
    }

    /// Starts watching Service resources, plus the Deployments they own.
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.service_api.clone(), watcher::Config::default()).watches(
            self.deployment_api.clone(),
            watcher::Config::default(),
            |deployment| owning_service(&deployment),
        );
        watch_resource(
            controller,
            self.ctx.clone(),
            |reconciler, service: Arc<Service>| {
                Box::pin(async move {
                    let namespace = service.namespace().unwrap_or_default();
                    reconciler.reconcile_service(&namespace, &service.name_any()).await
                })
            },
            "service",
            self.concurrency,
            self.shutdown.clone(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::workload::desired_deployment;

    #[test]
    fn test_owning_service_from_annotations() {
        let deployment = desired_deployment(&create_http_service());
        let service = owning_service(&deployment).expect("owner");
        assert_eq!(service.name, "foo");
        assert_eq!(service.namespace.as_deref(), Some("ns"));
    }

    #[test]
    fn test_unannotated_deployment_maps_to_nothing() {
        let mut deployment = desired_deployment(&create_http_service());
        deployment.metadata.annotations = None;
        assert!(owning_service(&deployment).is_none());
    }

    #[test]
    fn test_object_key() {
        let node = create_test_node("worker-1", &[], &[]);
        assert_eq!(object_key("node", &node), "node/worker-1");
        assert_eq!(object_key("service", &create_http_service()), "service/ns/foo");
    }

    #[test]
    fn test_backoff_per_object_resets_on_success() {
        let store = cluster_store::MockClusterStore::new();
        let ctx = WatchContext::new(
            Arc::new(create_test_reconciler(&store)),
            Arc::new(Metrics::new().expect("metrics")),
        );

        assert_eq!(ctx.next_backoff("service/ns/foo"), Duration::from_secs(1));
        assert_eq!(ctx.next_backoff("service/ns/foo"), Duration::from_secs(1));
        assert_eq!(ctx.next_backoff("service/ns/foo"), Duration::from_secs(2));
        assert_eq!(ctx.next_backoff("service/ns/bar"), Duration::from_secs(1));

        ctx.reset_backoff("service/ns/foo");
        assert_eq!(ctx.next_backoff("service/ns/foo"), Duration::from_secs(1));
    }
}
