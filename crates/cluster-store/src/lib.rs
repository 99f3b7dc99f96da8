//! Cluster object store
//!
//! The narrow slice of the Kubernetes API that the easylb reconcilers depend on:
//! typed get/list/create/update/update-status/delete for Services,
//! Deployments, Pods and Nodes.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{ClusterStore, KubeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client);
//!
//! let svc = store.get_service("default", "web").await?;
//! println!("resource version: {:?}", svc.metadata.resource_version);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Every update is a full-object replace that carries the resource version read
//! earlier in the same reconciliation. A stale version surfaces as
//! [`StoreError::Conflict`] and is never retried here.

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use store_trait::ClusterStore;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterStore, ObjectKind, Operation, WriteRecord};
