//! Desired state derived from a Service.
//!
//! Everything here is a pure function of the Service object: the
//! load-balancer Deployment name, its full spec, and the lifecycle phase the
//! Service reconciler acts on. Nothing is cached between invocations.

use crate::constants::{
    CONTROL_PLANE_TAINT, DEFAULT_PROTOCOL, DEPLOYMENT_NAME_PREFIX, ENABLE_IP_FORWARD_IMAGE, EXCLUDE_NODE_LABEL,
    EXTERNAL_IP_LABEL, EXTERNAL_IP_PREFERENCE_WEIGHT, FINALIZER_NAME, LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION,
    LOAD_BALANCER_FOR_NAME_ANNOTATION, LOAD_BALANCER_IMAGE, MANAGED_ANNOTATION, NAMESPACE, NET_ADMIN_CAPABILITY,
    POD_NAME_LABEL, SERVICE_TYPE_LOAD_BALANCER,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, ContainerPort, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, PodSpec, PodTemplateSpec, PreferredSchedulingTerm, SecurityContext, Service, ServicePort,
    Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

/// Lifecycle phase of a Service, recomputed on every reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    /// Deletion timestamp is set; clean up and release the finalizer.
    Deleting,
    /// Not a LoadBalancer Service; no workload may exist.
    NotLoadBalancer,
    /// LoadBalancer Service that should own a running workload.
    Converging,
}

/// Classify a Service. Deletion takes precedence over type.
#[must_use]
pub fn classify(service: &Service) -> ServicePhase {
    if service.metadata.deletion_timestamp.is_some() {
        return ServicePhase::Deleting;
    }
    let is_load_balancer = service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == SERVICE_TYPE_LOAD_BALANCER);
    if is_load_balancer {
        ServicePhase::Converging
    } else {
        ServicePhase::NotLoadBalancer
    }
}

/// `easylb-lb-<namespace>-<name>`
#[must_use]
pub fn deployment_name(service: &Service) -> String {
    format!(
        "{DEPLOYMENT_NAME_PREFIX}{}-{}",
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Label selector string matching the workload pods of `service`.
#[must_use]
pub fn pod_selector(service: &Service) -> String {
    format!("{POD_NAME_LABEL}={}", deployment_name(service))
}

/// True when the Service carries the easylb finalizer.
#[must_use]
pub fn has_finalizer(service: &Service) -> bool {
    service
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == FINALIZER_NAME))
}

fn protocol(port: &ServicePort) -> &str {
    port.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
}

/// One container port per Service port, bound on the host at the same number.
#[must_use]
pub fn container_ports(ports: &[ServicePort]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|port| ContainerPort {
            name: port.name.clone(),
            container_port: port.port,
            host_port: Some(port.port),
            protocol: Some(protocol(port).to_string()),
            ..Default::default()
        })
        .collect()
}

/// Data-plane startup argument: `"<clusterIP> <port> <protocol> "` per port.
#[must_use]
pub fn generate_argument(ports: &[ServicePort], cluster_ip: &str) -> String {
    ports
        .iter()
        .map(|port| format!("{cluster_ip} {} {} ", port.port, protocol(port).to_lowercase()))
        .collect()
}

fn ownership_annotations(service: &Service) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_ANNOTATION.to_string(), String::new()),
        (
            LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION.to_string(),
            service.metadata.namespace.clone().unwrap_or_default(),
        ),
        (
            LOAD_BALANCER_FOR_NAME_ANNOTATION.to_string(),
            service.metadata.name.clone().unwrap_or_default(),
        ),
    ])
}

fn scheduling_affinity() -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: EXCLUDE_NODE_LABEL.to_string(),
                        operator: "DoesNotExist".to_string(),
                        values: None,
                    }]),
                    match_fields: None,
                }],
            }),
            preferred_during_scheduling_ignored_during_execution: Some(vec![PreferredSchedulingTerm {
                weight: EXTERNAL_IP_PREFERENCE_WEIGHT,
                preference: NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: EXTERNAL_IP_LABEL.to_string(),
                        operator: "Exists".to_string(),
                        values: None,
                    }]),
                    match_fields: None,
                },
            }]),
        }),
        ..Default::default()
    }
}

/// The full Deployment the Service should own. Updates replace the spec
/// wholesale, so every field we care about is set here.
#[must_use]
pub fn desired_deployment(service: &Service) -> Deployment {
    let name = deployment_name(service);
    let spec = service.spec.clone().unwrap_or_default();
    let ports = spec.ports.unwrap_or_default();
    let cluster_ip = spec.cluster_ip.unwrap_or_default();
    let labels = BTreeMap::from([(POD_NAME_LABEL.to_string(), name.clone())]);
    let annotations = ownership_annotations(service);

    let container = Container {
        name: name.clone(),
        image: Some(LOAD_BALANCER_IMAGE.to_string()),
        ports: Some(container_ports(&ports)),
        args: Some(vec![generate_argument(&ports, &cluster_ip)]),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec![NET_ADMIN_CAPABILITY.to_string()]),
                drop: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let init_container = Container {
        name: format!("init-{name}"),
        image: Some(ENABLE_IP_FORWARD_IMAGE.to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(annotations.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    init_containers: Some(vec![init_container]),
                    affinity: Some(scheduling_affinity()),
                    tolerations: Some(vec![Toleration {
                        key: Some(CONTROL_PLANE_TAINT.to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// True when every entry of `desired` is present in `existing` with the
/// same value. Keys added by other writers are ignored.
fn contains_all(existing: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    desired
        .iter()
        .all(|(k, v)| existing.and_then(|m| m.get(k)) == Some(v))
}

/// `overlay` on top of `base`; `None` only when both are absent.
fn merge_maps(
    base: Option<&BTreeMap<String, String>>,
    overlay: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    if base.is_none() && overlay.is_none() {
        return None;
    }
    let mut merged = base.cloned().unwrap_or_default();
    merged.extend(overlay.into_iter().flatten().map(|(k, v)| (k.clone(), v.clone())));
    Some(merged)
}

/// Compares only the container fields `desired_deployment` sets, so server
/// defaults such as `terminationMessagePath` or `imagePullPolicy` do not
/// count as drift.
fn container_matches(existing: &Container, desired: &Container) -> bool {
    fn port_key(p: &ContainerPort) -> (i32, Option<i32>, &str) {
        (p.container_port, p.host_port, p.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL))
    }
    fn security_key(c: &Container) -> (Option<&Vec<String>>, Option<bool>) {
        let sc = c.security_context.as_ref();
        (
            sc.and_then(|s| s.capabilities.as_ref()).and_then(|c| c.add.as_ref()),
            sc.and_then(|s| s.privileged),
        )
    }

    fn ports(c: &Container) -> Vec<(i32, Option<i32>, &str)> {
        c.ports.iter().flatten().map(port_key).collect()
    }

    existing.name == desired.name
        && existing.image == desired.image
        && existing.args == desired.args
        && ports(existing) == ports(desired)
        && security_key(existing) == security_key(desired)
}

fn containers_match(existing: &[Container], desired: &[Container]) -> bool {
    existing.len() == desired.len() && existing.iter().zip(desired).all(|(e, d)| container_matches(e, d))
}

fn pod_spec_matches(existing: &PodSpec, desired: &PodSpec) -> bool {
    let tolerations_present = desired
        .tolerations
        .iter()
        .flatten()
        .all(|t| existing.tolerations.iter().flatten().any(|e| e == t));

    containers_match(&existing.containers, &desired.containers)
        && containers_match(
            existing.init_containers.as_deref().unwrap_or_default(),
            desired.init_containers.as_deref().unwrap_or_default(),
        )
        && existing.affinity == desired.affinity
        && tolerations_present
}

/// True when `existing` already carries everything `desired` sets: the
/// ownership annotations, replica count, selector, template labels and
/// annotations, and the pod fields we own. Annotations and defaults added by
/// the API server or the Deployment controller are ignored.
#[must_use]
pub fn deployment_matches(existing: &Deployment, desired: &Deployment) -> bool {
    if !contains_all(
        existing.metadata.annotations.as_ref(),
        desired.metadata.annotations.as_ref(),
    ) {
        return false;
    }
    let (Some(existing), Some(desired)) = (existing.spec.as_ref(), desired.spec.as_ref()) else {
        return existing.spec.is_none() && desired.spec.is_none();
    };

    let existing_meta = existing.template.metadata.as_ref();
    let desired_meta = desired.template.metadata.as_ref();
    let template_meta_matches = contains_all(
        existing_meta.and_then(|m| m.labels.as_ref()),
        desired_meta.and_then(|m| m.labels.as_ref()),
    ) && contains_all(
        existing_meta.and_then(|m| m.annotations.as_ref()),
        desired_meta.and_then(|m| m.annotations.as_ref()),
    );

    let pod_matches = match (existing.template.spec.as_ref(), desired.template.spec.as_ref()) {
        (Some(e), Some(d)) => pod_spec_matches(e, d),
        (e, d) => e.is_none() && d.is_none(),
    };

    existing.replicas.unwrap_or(1) == desired.replicas.unwrap_or(1)
        && existing.selector.match_labels == desired.selector.match_labels
        && template_meta_matches
        && pod_matches
}

/// The object to send when `existing` has drifted from `desired`.
///
/// The spec is replaced with the desired one. Annotations written by other
/// parties, on the Deployment and on its pod template, are carried over, and
/// the resource version of `existing` guards the write.
#[must_use]
pub fn deployment_update(existing: &Deployment, desired: &Deployment) -> Deployment {
    let mut updated = desired.clone();
    updated.metadata.resource_version.clone_from(&existing.metadata.resource_version);
    updated.metadata.labels = merge_maps(existing.metadata.labels.as_ref(), desired.metadata.labels.as_ref());
    updated.metadata.annotations = merge_maps(
        existing.metadata.annotations.as_ref(),
        desired.metadata.annotations.as_ref(),
    );

    let existing_template = existing
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref());
    if let Some(template) = updated.spec.as_mut().and_then(|s| s.template.metadata.as_mut()) {
        template.annotations = merge_maps(existing_template, template.annotations.as_ref());
    }
    updated
}
