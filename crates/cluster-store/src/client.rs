//! Kubernetes-backed cluster store

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource};
use tracing::debug;

/// Cluster store implemented on top of `kube::Api`
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create a store that talks to the cluster through `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

/// Extract `(namespace, name)` from a namespaced object about to be written.
fn namespaced_identity<K: Resource>(obj: &K, kind: &str) -> Result<(String, String), StoreError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{kind} missing name")))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{kind} {name} missing namespace")))?;
    Ok((namespace, name))
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, StoreError> {
        Ok(self.services(namespace).get(name).await?)
    }

    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        let (namespace, name) = namespaced_identity(service, "Service")?;
        debug!("Replacing Service {}/{}", namespace, name);
        Ok(self
            .services(&namespace)
            .replace(&name, &PostParams::default(), service)
            .await?)
    }

    async fn update_service_status(&self, service: &Service) -> Result<Service, StoreError> {
        let (namespace, name) = namespaced_identity(service, "Service")?;
        debug!("Replacing status of Service {}/{}", namespace, name);
        let body = serde_json::to_vec(service)?;
        Ok(self
            .services(&namespace)
            .replace_status(&name, &PostParams::default(), body)
            .await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, StoreError> {
        Ok(self.deployments(namespace).get(name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let (namespace, name) = namespaced_identity(deployment, "Deployment")?;
        debug!("Creating Deployment {}/{}", namespace, name);
        Ok(self
            .deployments(&namespace)
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let (namespace, name) = namespaced_identity(deployment, "Deployment")?;
        debug!("Replacing Deployment {}/{}", namespace, name);
        Ok(self
            .deployments(&namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await?)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!("Deleting Deployment {}/{}", namespace, name);
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        Ok(self.pods(namespace).get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pods(namespace).list(&lp).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        Ok(self.nodes().get(name).await?)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidObject("Node missing name".to_string()))?;
        debug!("Replacing Node {}", name);
        Ok(self.nodes().replace(&name, &PostParams::default(), node).await?)
    }
}
