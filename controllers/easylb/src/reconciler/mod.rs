//! Reconciliation logic.
//!
//! One `Reconciler` serves three independent, level-triggered entry points:
//! - `node`: label Nodes that have an external address
//! - `pod`: publish the IP of a Running load-balancer pod on its Service
//! - `service`: own the load-balancer Deployment of each LoadBalancer Service
//!
//! The entry points never call each other. They converge through the objects
//! they write, which the other entry points observe.

pub mod node;
pub mod pod;
pub mod service;
#[cfg(test)]
mod service_test;

use crate::config::Config;
use crate::constants::NODE_EXTERNAL_IP;
use cluster_store::ClusterStore;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service, ServiceStatus};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reconciles Nodes, load-balancer Pods and Services.
///
/// Holds no per-object state, so concurrent invocations for different
/// objects are safe; races on the same object surface as store conflicts.
pub struct Reconciler {
    pub(crate) store: Box<dyn ClusterStore + Send + Sync>,
    pub(crate) rollout_poll_interval: Duration,
    pub(crate) rollout_timeout: Duration,
    /// Cancelled on shutdown; aborts an in-flight rollout wait.
    pub(crate) shutdown: CancellationToken,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("rollout_poll_interval", &self.rollout_poll_interval)
            .field("rollout_timeout", &self.rollout_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(store: Box<dyn ClusterStore + Send + Sync>, config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            store,
            rollout_poll_interval: config.rollout_poll_interval,
            rollout_timeout: config.rollout_timeout,
            shutdown,
        }
    }
}

/// IP a load-balancer pod is reachable on: the first `ExternalIP` address of
/// its Node, or the pod's host IP when the Node has none.
#[must_use]
pub fn resolve_ingress_ip(host_ip: &str, node: &Node) -> String {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| addresses.iter().find(|a| a.type_ == NODE_EXTERNAL_IP))
        .map_or_else(|| host_ip.to_string(), |a| a.address.clone())
}

/// True when the Service already publishes exactly `ip` and nothing else.
pub(crate) fn ingress_is(service: &Service, ip: &str) -> bool {
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();
    matches!(ingress, [only] if only.ip.as_deref() == Some(ip) && only.hostname.is_none())
}

/// Replace the published ingress with `ip` as the sole entry.
pub(crate) fn set_ingress(service: &mut Service, ip: &str) {
    let status = service.status.get_or_insert_with(ServiceStatus::default);
    status.load_balancer = Some(LoadBalancerStatus {
        ingress: Some(vec![LoadBalancerIngress {
            ip: Some(ip.to_string()),
            ..Default::default()
        }]),
    });
}

/// Drop any published ingress. Returns false when there was none.
pub(crate) fn clear_ingress(service: &mut Service) -> bool {
    let Some(lb) = service.status.as_mut().and_then(|s| s.load_balancer.as_mut()) else {
        return false;
    };
    if lb.ingress.as_ref().is_none_or(Vec::is_empty) {
        return false;
    }
    lb.ingress = None;
    true
}

/// `namespace/name` for log lines and error context.
pub(crate) fn qualified(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
