//! Controller-specific error types.
//!
//! This module defines error types for the easylb controller that are not
//! covered by upstream library errors. Every variant is a hard error: the
//! runtime requeues the object with backoff.

use crate::readiness::ReadinessError;
use cluster_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the easylb controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A store operation failed; `op` names the step, `object` the target.
    #[error("{op} {object}: {source}")]
    Store {
        op: &'static str,
        object: String,
        #[source]
        source: StoreError,
    },

    /// The load-balancer Deployment did not finish rolling out in time.
    #[error("timed out waiting for Deployment {name} to complete, last status: {last_status}")]
    RolloutTimeout { name: String, last_status: String },

    /// Shutdown was requested while waiting for a rollout.
    #[error("cancelled while waiting for Deployment {0}")]
    Cancelled(String),

    /// Rollout reported complete but no pods match the selector.
    #[error("Deployment {0} completed but has no pods")]
    NoWorkloadPods(String),

    /// Object is missing a field the reconciler depends on.
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubernetes client setup failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource watch or probe server failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Wrap a store error with the operation and object it came from.
    pub fn store(op: &'static str, object: impl Into<String>, source: StoreError) -> Self {
        ControllerError::Store {
            op,
            object: object.into(),
            source,
        }
    }

    /// Coarse label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Store { source, .. } if source.is_conflict() => "conflict",
            ControllerError::Store { source, .. } if source.is_not_found() => "not_found",
            ControllerError::Store { .. } => "store",
            ControllerError::RolloutTimeout { .. } => "rollout_timeout",
            ControllerError::Cancelled(_) => "cancelled",
            ControllerError::NoWorkloadPods(_) => "no_workload_pods",
            ControllerError::InvalidObject(_) => "invalid_object",
            ControllerError::InvalidConfig(_) => "invalid_config",
            ControllerError::Kube(_) => "kube",
            ControllerError::Watch(_) => "watch",
            ControllerError::Metrics(_) => "metrics",
        }
    }
}

impl From<ReadinessError> for ControllerError {
    fn from(err: ReadinessError) -> Self {
        match err {
            ReadinessError::Timeout { name, last_status } => ControllerError::RolloutTimeout { name, last_status },
            ReadinessError::Cancelled { name } => ControllerError::Cancelled(name),
            ReadinessError::Store { name, source } => ControllerError::store("wait for Deployment", name, source),
        }
    }
}
