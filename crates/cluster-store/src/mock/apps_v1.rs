//! Apps operations for MockClusterStore
//!
//! Handles Deployments, plus the rollout simulation that stands in for the
//! Deployment controller, ReplicaSets and the scheduler.

use super::helpers::{check_version, display_key, identity, key, labels_match, lock, next_version};
use super::{Key, MockClusterStore, ObjectKind, Operation};
use crate::error::StoreError;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub(crate) fn seed_deployment(store: &MockClusterStore, mut deployment: Deployment) {
    if deployment.metadata.resource_version.is_none() {
        deployment.metadata.resource_version = Some(next_version(store));
    }
    if deployment.metadata.generation.is_none() {
        deployment.metadata.generation = Some(1);
    }
    let k = key(
        deployment.metadata.namespace.as_deref().unwrap_or_default(),
        deployment.metadata.name.as_deref().unwrap_or_default(),
    );
    lock(&store.deployments).insert(k, deployment);
}

pub(crate) fn get_deployment(store: &MockClusterStore, namespace: &str, name: &str) -> Result<Deployment, StoreError> {
    store.check_failure(Operation::Get, ObjectKind::Deployment)?;
    let k = key(namespace, name);
    lock(&store.deployments)
        .get(&k)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(format!("Deployment {} not found", display_key(&k))))
}

pub(crate) fn create_deployment(store: &MockClusterStore, deployment: &Deployment) -> Result<Deployment, StoreError> {
    store.check_failure(Operation::Create, ObjectKind::Deployment)?;
    let k = identity(&deployment.metadata, "Deployment")?;
    let mut deployments = lock(&store.deployments);
    if deployments.contains_key(&k) {
        return Err(StoreError::Conflict(format!(
            "Deployment {} already exists",
            display_key(&k)
        )));
    }

    let mut created = deployment.clone();
    created.metadata.resource_version = Some(next_version(store));
    created.metadata.generation = Some(1);
    created.status = None;
    deployments.insert(k.clone(), created.clone());
    drop(deployments);

    store.record(Operation::Create, ObjectKind::Deployment, display_key(&k));
    Ok(simulate_rollout(store, &k).unwrap_or(created))
}

/// Full replace of metadata and spec; generation moves only when the spec changes.
pub(crate) fn update_deployment(store: &MockClusterStore, deployment: &Deployment) -> Result<Deployment, StoreError> {
    store.check_failure(Operation::Update, ObjectKind::Deployment)?;
    let k = identity(&deployment.metadata, "Deployment")?;
    let mut deployments = lock(&store.deployments);
    let stored = deployments
        .get(&k)
        .ok_or_else(|| StoreError::NotFound(format!("Deployment {} not found", display_key(&k))))?;
    check_version(&stored.metadata, &deployment.metadata, &format!("Deployment {}", display_key(&k)))?;

    let generation = stored.metadata.generation.unwrap_or(1);
    let mut updated = deployment.clone();
    updated.metadata.generation = Some(if stored.spec == deployment.spec {
        generation
    } else {
        generation + 1
    });
    updated.status.clone_from(&stored.status);
    updated.metadata.resource_version = Some(next_version(store));
    deployments.insert(k.clone(), updated.clone());
    drop(deployments);

    store.record(Operation::Update, ObjectKind::Deployment, display_key(&k));
    Ok(simulate_rollout(store, &k).unwrap_or(updated))
}

/// Deletes the Deployment and, like the garbage collector, the pods it selects.
pub(crate) fn delete_deployment(store: &MockClusterStore, namespace: &str, name: &str) -> Result<(), StoreError> {
    store.check_failure(Operation::Delete, ObjectKind::Deployment)?;
    let k = key(namespace, name);
    let removed = lock(&store.deployments)
        .remove(&k)
        .ok_or_else(|| StoreError::NotFound(format!("Deployment {} not found", display_key(&k))))?;

    if let Some(selector) = removed.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref()) {
        lock(&store.pods).retain(|(ns, _), pod| ns != namespace || !labels_match(selector, pod.metadata.labels.as_ref()));
    }

    store.record(Operation::Delete, ObjectKind::Deployment, display_key(&k));
    Ok(())
}

/// Mark the Deployment complete and schedule its pods, when simulation is on.
fn simulate_rollout(store: &MockClusterStore, k: &Key) -> Option<Deployment> {
    let rollout = lock(&store.rollout).clone()?;
    let mut deployments = lock(&store.deployments);
    let deployment = deployments.get_mut(k)?;
    let spec = deployment.spec.clone()?;
    let replicas = spec.replicas.unwrap_or(1);

    deployment.status = Some(DeploymentStatus {
        replicas: Some(replicas),
        updated_replicas: Some(replicas),
        available_replicas: Some(replicas),
        ready_replicas: Some(replicas),
        observed_generation: deployment.metadata.generation,
        ..Default::default()
    });
    let snapshot = deployment.clone();
    drop(deployments);

    let template = spec.template;
    let mut pods = lock(&store.pods);
    for i in 0..replicas {
        let name = format!("{}-{i}", k.1);
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(k.0.clone()),
                labels: template.metadata.as_ref().and_then(|m| m.labels.clone()),
                annotations: template.metadata.as_ref().and_then(|m| m.annotations.clone()),
                resource_version: Some(next_version(store)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(rollout.node_name.clone()),
                ..template.spec.clone().unwrap_or_default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                host_ip: Some(rollout.host_ip.clone()),
                ..Default::default()
            }),
        };
        pods.insert((k.0.clone(), name), pod);
    }
    Some(snapshot)
}
