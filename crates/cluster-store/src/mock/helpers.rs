//! Shared helpers for the mock store

use super::{Key, MockClusterStore};
use crate::error::StoreError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking test poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

pub(crate) fn display_key(key: &Key) -> String {
    format!("{}/{}", key.0, key.1)
}

/// Namespaced identity of an object about to be written.
pub(crate) fn identity(meta: &ObjectMeta, kind: &str) -> Result<Key, StoreError> {
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

/// Allocate the next resource version.
pub(crate) fn next_version(store: &MockClusterStore) -> String {
    let mut version = lock(&store.next_version);
    *version += 1;
    version.to_string()
}

/// Compare-and-swap guard: the written object must carry the stored version.
pub(crate) fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta, what: &str) -> Result<(), StoreError> {
    if stored.resource_version != incoming.resource_version {
        return Err(StoreError::Conflict(format!(
            "{what}: resource version {:?} does not match current {:?}",
            incoming.resource_version, stored.resource_version
        )));
    }
    Ok(())
}

/// Parse an equality-based label selector (`a=b,c=d`).
pub(crate) fn parse_selector(selector: &str) -> Result<BTreeMap<String, String>, StoreError> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            term.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| StoreError::Api(format!("unsupported label selector term: {term}")))
        })
        .collect()
}

/// True when every selector label is present on `labels` with the same value.
pub(crate) fn labels_match(selector: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Timestamp used when simulating deletion requests.
pub(crate) fn deletion_time() -> Result<Time, StoreError> {
    Ok(serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z"))?)
}
