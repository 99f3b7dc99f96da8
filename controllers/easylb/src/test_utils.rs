//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test objects and a reconciler
//! wired to an in-memory store.

#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::constants::{
    LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION, LOAD_BALANCER_FOR_NAME_ANNOTATION, MANAGED_ANNOTATION, NAMESPACE,
};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use cluster_store::MockClusterStore;
#[cfg(test)]
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStrategy};
#[cfg(test)]
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeStatus, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tokio_util::sync::CancellationToken;

/// Helper to create a Service port
#[cfg(test)]
pub fn service_port(name: &str, port: i32, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// Helper to create a test Service
#[cfg(test)]
pub fn create_test_service(
    namespace: &str,
    name: &str,
    service_type: &str,
    ports: Vec<ServicePort>,
    cluster_ip: &str,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            ports: Some(ports),
            cluster_ip: Some(cluster_ip.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// The `ns/foo` LoadBalancer Service serving HTTP on 80/TCP
#[cfg(test)]
pub fn create_http_service() -> Service {
    create_test_service(
        "ns",
        "foo",
        "LoadBalancer",
        vec![service_port("http", 80, "TCP")],
        "10.0.0.5",
    )
}

/// Helper to create a test Node with `(type, address)` pairs
#[cfg(test)]
pub fn create_test_node(name: &str, addresses: &[(&str, &str)], labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: if labels.is_empty() {
                None
            } else {
                Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(t, a)| NodeAddress {
                        type_: (*t).to_string(),
                        address: (*a).to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// Helper to create a managed workload Pod pointing back at `ns/foo`
#[cfg(test)]
pub fn create_managed_pod(name: &str, phase: &str, node_name: &str, host_ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(BTreeMap::from([
                (MANAGED_ANNOTATION.to_string(), String::new()),
                (LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION.to_string(), "ns".to_string()),
                (LOAD_BALANCER_FOR_NAME_ANNOTATION.to_string(), "foo".to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            host_ip: Some(host_ip.to_string()),
            ..Default::default()
        }),
    }
}

/// Stamp what the API server and the Deployment controller add to a stored
/// Deployment: a revision annotation and defaulted spec fields.
#[cfg(test)]
pub fn apply_server_defaults(deployment: &mut Deployment) {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert("deployment.kubernetes.io/revision".to_string(), "1".to_string());

    let Some(spec) = deployment.spec.as_mut() else {
        return;
    };
    spec.progress_deadline_seconds = Some(600);
    spec.revision_history_limit = Some(10);
    spec.strategy = Some(DeploymentStrategy {
        type_: Some("RollingUpdate".to_string()),
        ..Default::default()
    });

    if let Some(pod) = spec.template.spec.as_mut() {
        pod.restart_policy = Some("Always".to_string());
        pod.dns_policy = Some("ClusterFirst".to_string());
        pod.scheduler_name = Some("default-scheduler".to_string());
        pod.termination_grace_period_seconds = Some(30);
        for container in pod.containers.iter_mut().chain(pod.init_containers.iter_mut().flatten()) {
            container.image_pull_policy = Some("Always".to_string());
            container.termination_message_path = Some("/dev/termination-log".to_string());
            container.termination_message_policy = Some("File".to_string());
        }
    }
}

/// Config with short rollout timings so timeouts resolve quickly
#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        rollout_poll_interval: Duration::from_secs(1),
        rollout_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

/// Reconciler wired to `store`
#[cfg(test)]
pub fn create_test_reconciler(store: &MockClusterStore) -> Reconciler {
    Reconciler::new(Box::new(store.clone()), &test_config(), CancellationToken::new())
}
