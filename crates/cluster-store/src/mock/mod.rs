//! Mock ClusterStore for unit testing
//!
//! This module provides an in-memory implementation of [`ClusterStore`] that can
//! be used in unit tests without a running API server.
//!
//! The mock is organized into API-group modules:
//! - `core_v1.rs` - Services, Pods and Nodes
//! - `apps_v1.rs` - Deployments and the optional rollout simulation
//! - `helpers.rs` - Locking, resource versions, label selectors
//!
//! Semantics follow the API server closely enough for reconciler tests:
//! every write bumps `metadata.resourceVersion`, updates carrying a stale
//! version fail with [`StoreError::Conflict`], status updates only touch
//! `status`, and a Service marked for deletion disappears once its last
//! finalizer is removed.

mod apps_v1;
mod core_v1;
mod helpers;

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use helpers::lock;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Namespaced object key
pub(crate) type Key = (String, String);

/// Kind of object held by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Service,
    Deployment,
    Pod,
    Node,
}

/// Store operation, used for the write log and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// One successful write against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub operation: Operation,
    pub kind: ObjectKind,
    /// `namespace/name`, or `name` for cluster-scoped objects
    pub key: String,
}

/// Simulated Deployment rollout: every applied Deployment immediately reports
/// complete and gets Running pods scheduled on a fixed node.
#[derive(Debug, Clone)]
pub(crate) struct RolloutSimulation {
    pub(crate) node_name: String,
    pub(crate) host_ip: String,
}

/// Mock ClusterStore for testing
///
/// Clones share the same underlying storage, so a test can hand one clone to
/// the code under test and inspect state through another.
#[derive(Clone, Default)]
pub struct MockClusterStore {
    pub(crate) services: Arc<Mutex<BTreeMap<Key, Service>>>,
    pub(crate) deployments: Arc<Mutex<BTreeMap<Key, Deployment>>>,
    pub(crate) pods: Arc<Mutex<BTreeMap<Key, Pod>>>,
    pub(crate) nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    pub(crate) writes: Arc<Mutex<Vec<WriteRecord>>>,
    pub(crate) failures: Arc<Mutex<Vec<(Operation, ObjectKind)>>>,
    pub(crate) rollout: Arc<Mutex<Option<RolloutSimulation>>>,
    pub(crate) next_version: Arc<Mutex<u64>>,
}

impl fmt::Debug for MockClusterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClusterStore")
            .field("services", &lock(&self.services).len())
            .field("deployments", &lock(&self.deployments).len())
            .field("pods", &lock(&self.pods).len())
            .field("nodes", &lock(&self.nodes).len())
            .finish_non_exhaustive()
    }
}

impl MockClusterStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every created or updated Deployment complete its rollout at once,
    /// with Running pods on `node_name` reporting `host_ip`.
    #[must_use]
    pub fn with_rollout(self, node_name: impl Into<String>, host_ip: impl Into<String>) -> Self {
        *lock(&self.rollout) = Some(RolloutSimulation {
            node_name: node_name.into(),
            host_ip: host_ip.into(),
        });
        self
    }

    /// Add a Service to the mock store (for test setup)
    pub fn add_service(&self, service: Service) {
        core_v1::seed_service(self, service);
    }

    /// Add a Deployment to the mock store (for test setup)
    pub fn add_deployment(&self, deployment: Deployment) {
        apps_v1::seed_deployment(self, deployment);
    }

    /// Add a Pod to the mock store (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        core_v1::seed_pod(self, pod);
    }

    /// Add a Node to the mock store (for test setup)
    pub fn add_node(&self, node: Node) {
        core_v1::seed_node(self, node);
    }

    /// Simulate `kubectl delete` on a Service: the object disappears at once
    /// when it has no finalizers, otherwise it gets a deletion timestamp.
    pub fn mark_service_for_deletion(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        core_v1::mark_service_for_deletion(self, namespace, name)
    }

    /// Make the next `operation` on `kind` fail with [`StoreError::Api`].
    pub fn fail_next(&self, operation: Operation, kind: ObjectKind) {
        lock(&self.failures).push((operation, kind));
    }

    /// Current Service, if stored
    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services).get(&helpers::key(namespace, name)).cloned()
    }

    /// Current Deployment, if stored
    #[must_use]
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.deployments).get(&helpers::key(namespace, name)).cloned()
    }

    /// All stored Deployments in key order
    #[must_use]
    pub fn deployments(&self) -> Vec<Deployment> {
        lock(&self.deployments).values().cloned().collect()
    }

    /// Current Pod, if stored
    #[must_use]
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        lock(&self.pods).get(&helpers::key(namespace, name)).cloned()
    }

    /// Current Node, if stored
    #[must_use]
    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.nodes).get(name).cloned()
    }

    /// Successful writes in the order they happened
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Consume an injected failure for `operation` on `kind`, if any.
    pub(crate) fn check_failure(&self, operation: Operation, kind: ObjectKind) -> Result<(), StoreError> {
        let mut failures = lock(&self.failures);
        if let Some(pos) = failures.iter().position(|f| *f == (operation, kind)) {
            failures.remove(pos);
            return Err(StoreError::Api(format!("injected failure: {operation:?} {kind:?}")));
        }
        Ok(())
    }

    pub(crate) fn record(&self, operation: Operation, kind: ObjectKind, key: String) {
        lock(&self.writes).push(WriteRecord { operation, kind, key });
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    // Core operations - delegated to core module
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError> {
        core_v1::get_service(self, namespace, name)
    }

    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        core_v1::update_service(self, service)
    }

    async fn update_service_status(&self, service: &Service) -> Result<Service, StoreError> {
        core_v1::update_service_status(self, service)
    }

    // Apps operations - delegated to apps module
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, StoreError> {
        apps_v1::get_deployment(self, namespace, name)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        apps_v1::create_deployment(self, deployment)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        apps_v1::update_deployment(self, deployment)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        apps_v1::delete_deployment(self, namespace, name)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        core_v1::get_pod(self, namespace, name)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError> {
        core_v1::list_pods(self, namespace, label_selector)
    }

    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        core_v1::get_node(self, name)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        core_v1::update_node(self, node)
    }
}
