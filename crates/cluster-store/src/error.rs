//! Cluster store errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed or the object already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object is missing identity fields required by the operation
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Transport or server failure not covered by the variants above
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true when the object addressed by the request does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Returns true when a write lost an optimistic concurrency race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(status) if status.code == 404 => StoreError::NotFound(status.message.clone()),
            kube::Error::Api(status) if status.code == 409 => StoreError::Conflict(status.message.clone()),
            _ => StoreError::Kube(err),
        }
    }
}
