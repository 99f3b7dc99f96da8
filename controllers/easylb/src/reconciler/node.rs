//! Node reconciler

use super::Reconciler;
use crate::constants::{EXTERNAL_IP_LABEL, NODE_EXTERNAL_IP};
use crate::error::ControllerError;
use tracing::{debug, info};

impl Reconciler {
    /// Ensures a Node with an `ExternalIP` address carries the
    /// discoverability label the load-balancer pods prefer.
    ///
    /// A missing Node is not an error. The label is only ever added here,
    /// never removed, and at most one update is issued per invocation.
    pub async fn reconcile_node(&self, name: &str) -> Result<(), ControllerError> {
        let mut node = match self.store.get_node(name).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                debug!("Node {} not found, nothing to do", name);
                return Ok(());
            }
            Err(e) => return Err(ControllerError::store("fetch Node", name, e)),
        };

        let has_external = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .is_some_and(|addresses| addresses.iter().any(|a| a.type_ == NODE_EXTERNAL_IP));
        if !has_external {
            debug!("Node {} has no external address", name);
            return Ok(());
        }

        let labels = node.metadata.labels.get_or_insert_with(Default::default);
        if labels.contains_key(EXTERNAL_IP_LABEL) {
            debug!("Node {} already labeled", name);
            return Ok(());
        }
        labels.insert(EXTERNAL_IP_LABEL.to_string(), String::new());

        self.store
            .update_node(&node)
            .await
            .map_err(|e| ControllerError::store("label Node", name, e))?;
        info!("Labeled Node {} with {}", name, EXTERNAL_IP_LABEL);
        Ok(())
    }
}
