//! Core operations for MockClusterStore
//!
//! Handles Services, Pods and Nodes

use super::helpers::{
    check_version, deletion_time, display_key, identity, key, labels_match, lock, next_version, parse_selector,
};
use super::{MockClusterStore, ObjectKind, Operation};
use crate::error::StoreError;
use k8s_openapi::api::core::v1::{Node, Pod, Service};

pub(crate) fn seed_service(store: &MockClusterStore, mut service: Service) {
    if service.metadata.resource_version.is_none() {
        service.metadata.resource_version = Some(next_version(store));
    }
    let k = key(
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default(),
    );
    lock(&store.services).insert(k, service);
}

pub(crate) fn seed_pod(store: &MockClusterStore, mut pod: Pod) {
    if pod.metadata.resource_version.is_none() {
        pod.metadata.resource_version = Some(next_version(store));
    }
    let k = key(
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    );
    lock(&store.pods).insert(k, pod);
}

pub(crate) fn seed_node(store: &MockClusterStore, mut node: Node) {
    if node.metadata.resource_version.is_none() {
        node.metadata.resource_version = Some(next_version(store));
    }
    let name = node.metadata.name.clone().unwrap_or_default();
    lock(&store.nodes).insert(name, node);
}

pub(crate) fn mark_service_for_deletion(
    store: &MockClusterStore,
    namespace: &str,
    name: &str,
) -> Result<(), StoreError> {
    let k = key(namespace, name);
    let mut services = lock(&store.services);
    let service = services
        .get_mut(&k)
        .ok_or_else(|| StoreError::NotFound(format!("Service {} not found", display_key(&k))))?;

    if service.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
        services.remove(&k);
        return Ok(());
    }
    if service.metadata.deletion_timestamp.is_none() {
        service.metadata.deletion_timestamp = Some(deletion_time()?);
        service.metadata.resource_version = Some(next_version(store));
    }
    Ok(())
}

pub(crate) fn get_service(store: &MockClusterStore, namespace: &str, name: &str) -> Result<Service, StoreError> {
    store.check_failure(Operation::Get, ObjectKind::Service)?;
    let k = key(namespace, name);
    lock(&store.services)
        .get(&k)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(format!("Service {} not found", display_key(&k))))
}

/// Full replace of metadata and spec. Status and deletion timestamp are
/// owned by the server and carried over from the stored object.
pub(crate) fn update_service(store: &MockClusterStore, service: &Service) -> Result<Service, StoreError> {
    store.check_failure(Operation::Update, ObjectKind::Service)?;
    let k = identity(&service.metadata, "Service")?;
    let mut services = lock(&store.services);
    let stored = services
        .get(&k)
        .ok_or_else(|| StoreError::NotFound(format!("Service {} not found", display_key(&k))))?;
    check_version(&stored.metadata, &service.metadata, &format!("Service {}", display_key(&k)))?;

    let mut updated = service.clone();
    updated.status.clone_from(&stored.status);
    updated.metadata.deletion_timestamp.clone_from(&stored.metadata.deletion_timestamp);
    updated.metadata.resource_version = Some(next_version(store));

    let finalized = updated.metadata.deletion_timestamp.is_some()
        && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
    if finalized {
        services.remove(&k);
    } else {
        services.insert(k.clone(), updated.clone());
    }
    drop(services);

    store.record(Operation::Update, ObjectKind::Service, display_key(&k));
    Ok(updated)
}

pub(crate) fn update_service_status(store: &MockClusterStore, service: &Service) -> Result<Service, StoreError> {
    store.check_failure(Operation::UpdateStatus, ObjectKind::Service)?;
    let k = identity(&service.metadata, "Service")?;
    let mut services = lock(&store.services);
    let stored = services
        .get_mut(&k)
        .ok_or_else(|| StoreError::NotFound(format!("Service {} not found", display_key(&k))))?;
    check_version(&stored.metadata, &service.metadata, &format!("Service {}", display_key(&k)))?;

    stored.status.clone_from(&service.status);
    stored.metadata.resource_version = Some(next_version(store));
    let updated = stored.clone();
    drop(services);

    store.record(Operation::UpdateStatus, ObjectKind::Service, display_key(&k));
    Ok(updated)
}

pub(crate) fn get_pod(store: &MockClusterStore, namespace: &str, name: &str) -> Result<Pod, StoreError> {
    store.check_failure(Operation::Get, ObjectKind::Pod)?;
    let k = key(namespace, name);
    lock(&store.pods)
        .get(&k)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(format!("Pod {} not found", display_key(&k))))
}

pub(crate) fn list_pods(store: &MockClusterStore, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError> {
    store.check_failure(Operation::List, ObjectKind::Pod)?;
    let selector = parse_selector(label_selector)?;
    Ok(lock(&store.pods)
        .iter()
        .filter(|((ns, _), pod)| ns == namespace && labels_match(&selector, pod.metadata.labels.as_ref()))
        .map(|(_, pod)| pod.clone())
        .collect())
}

pub(crate) fn get_node(store: &MockClusterStore, name: &str) -> Result<Node, StoreError> {
    store.check_failure(Operation::Get, ObjectKind::Node)?;
    lock(&store.nodes)
        .get(name)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(format!("Node {name} not found")))
}

pub(crate) fn update_node(store: &MockClusterStore, node: &Node) -> Result<Node, StoreError> {
    store.check_failure(Operation::Update, ObjectKind::Node)?;
    let name = node
        .metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject("Node missing name".to_string()))?;
    let mut nodes = lock(&store.nodes);
    let stored = nodes
        .get(&name)
        .ok_or_else(|| StoreError::NotFound(format!("Node {name} not found")))?;
    check_version(&stored.metadata, &node.metadata, &format!("Node {name}"))?;

    let mut updated = node.clone();
    updated.status.clone_from(&stored.status);
    updated.metadata.resource_version = Some(next_version(store));
    nodes.insert(name.clone(), updated.clone());
    drop(nodes);

    store.record(Operation::Update, ObjectKind::Node, name);
    Ok(updated)
}
