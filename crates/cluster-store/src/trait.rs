//! ClusterStore trait for mocking
//!
//! This trait abstracts the Kubernetes API so reconcilers can be exercised
//! against an in-memory store. The concrete [`KubeStore`](crate::KubeStore)
//! implements it for production use.

use crate::error::StoreError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};

/// Object store operations used by the reconcilers
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// `update_*` methods replace the whole object and fail with
/// [`StoreError::Conflict`] when the carried resource version is stale.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    // Services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError>;
    async fn update_service(&self, service: &Service) -> Result<Service, StoreError>;
    /// Replaces only the status subresource.
    async fn update_service_status(&self, service: &Service) -> Result<Service, StoreError>;

    // Deployments
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, StoreError>;
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    // Pods
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;
    /// Lists pods matching an equality-based label selector such as `name=web`.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError>;

    // Nodes
    async fn get_node(&self, name: &str) -> Result<Node, StoreError>;
    async fn update_node(&self, node: &Node) -> Result<Node, StoreError>;
}
