//! Stable names shared with objects persisted in the cluster.
//!
//! Label, annotation and finalizer keys are an external contract: changing
//! any of them orphans objects written by earlier releases.

use std::time::Duration;

/// Presence-only Node label marking nodes with an external address.
pub const EXTERNAL_IP_LABEL: &str = "easylb.hyperkiko.github.io/external-ip";
/// Nodes carrying this label never run load-balancer pods.
pub const EXCLUDE_NODE_LABEL: &str = "easylb.hyperkiko.github.io/exclude-node";

/// Presence-only annotation on Deployments and pod templates we manage.
pub const MANAGED_ANNOTATION: &str = "easylb.hyperkiko.github.io/managed";
/// Back-reference to the owning Service namespace.
pub const LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION: &str = "easylb.hyperkiko.github.io/load-balancer-for-namespace";
/// Back-reference to the owning Service name.
pub const LOAD_BALANCER_FOR_NAME_ANNOTATION: &str = "easylb.hyperkiko.github.io/load-balancer-for-name";

pub const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane";

pub const FINALIZER_NAME: &str = "easylb.hyperkiko.github.io/finalizer";

/// Namespace holding every load-balancer Deployment.
pub const NAMESPACE: &str = "easylb-system";

pub const LOAD_BALANCER_IMAGE: &str = "kikocodes/easylb-loadbalancer";
pub const ENABLE_IP_FORWARD_IMAGE: &str = "kikocodes/enable-ip-forward";

/// Deployment name prefix; the full name is `easylb-lb-<namespace>-<name>`.
pub const DEPLOYMENT_NAME_PREFIX: &str = "easylb-lb-";
/// Pod label key used by the Deployment selector.
pub const POD_NAME_LABEL: &str = "name";

pub const NET_ADMIN_CAPABILITY: &str = "NET_ADMIN";
/// Weight of the soft preference for nodes with an external address.
pub const EXTERNAL_IP_PREFERENCE_WEIGHT: i32 = 2;

pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
pub const NODE_EXTERNAL_IP: &str = "ExternalIP";
pub const POD_PHASE_RUNNING: &str = "Running";
pub const DEFAULT_PROTOCOL: &str = "TCP";

pub const DEFAULT_ROLLOUT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
