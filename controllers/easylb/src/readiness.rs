//! Deployment rollout readiness.
//!
//! The only blocking wait in the reconcilers: after the load-balancer
//! Deployment is applied, the Service reconciler polls it until the rollout
//! completes, the deadline passes, or shutdown is requested.

use cluster_store::{ClusterStore, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ways a rollout wait can end without a complete Deployment.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out waiting for Deployment {name}, last status: {last_status}")]
    Timeout { name: String, last_status: String },

    #[error("cancelled while waiting for Deployment {name}")]
    Cancelled { name: String },

    #[error("could not fetch Deployment {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },
}

/// True once every desired replica is updated and available and the
/// controller has observed the latest generation.
///
/// Unset `spec.replicas` means one replica, unset status counters mean zero.
#[must_use]
pub fn deployment_complete(deployment: &Deployment) -> bool {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    status.updated_replicas.unwrap_or(0) == desired
        && status.replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
        && status.observed_generation.unwrap_or(0) >= generation
}

/// One-line summary of the rollout counters, kept for timeout diagnostics.
#[must_use]
pub fn describe_status(deployment: &Deployment) -> String {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    match deployment.status.as_ref() {
        Some(s) => format!(
            "desired={desired} replicas={} updated={} available={} observedGeneration={} generation={generation}",
            s.replicas.unwrap_or(0),
            s.updated_replicas.unwrap_or(0),
            s.available_replicas.unwrap_or(0),
            s.observed_generation.unwrap_or(0),
        ),
        None => format!("desired={desired} generation={generation} status=<none>"),
    }
}

/// Poll `namespace/name` every `poll` until [`deployment_complete`] holds.
///
/// The first check happens immediately. Returns the complete Deployment, or
/// [`ReadinessError::Timeout`] once `timeout` elapses, or
/// [`ReadinessError::Cancelled`] when `cancel` fires first.
pub async fn wait_for_deployment_complete(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Deployment, ReadinessError> {
    let qualified = format!("{namespace}/{name}");
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_status = "<not observed>".to_string();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ReadinessError::Cancelled { name: qualified });
            }
            () = &mut deadline => {
                return Err(ReadinessError::Timeout { name: qualified, last_status });
            }
            _ = ticker.tick() => {}
        }

        // A slow fetch is bounded by the same deadline and token
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ReadinessError::Cancelled { name: qualified });
            }
            () = &mut deadline => {
                return Err(ReadinessError::Timeout { name: qualified, last_status });
            }
            fetched = store.get_deployment(namespace, name) => fetched,
        };
        let deployment = fetched.map_err(|source| ReadinessError::Store {
            name: qualified.clone(),
            source,
        })?;

        if deployment_complete(&deployment) {
            return Ok(deployment);
        }
        last_status = describe_status(&deployment);
        debug!("Deployment {} not complete yet: {}", qualified, last_status);
    }
}
