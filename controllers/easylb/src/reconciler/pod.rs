//! Pod reconciler

use super::{Reconciler, ingress_is, qualified, resolve_ingress_ip, set_ingress};
use crate::constants::{
    LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION, LOAD_BALANCER_FOR_NAME_ANNOTATION, MANAGED_ANNOTATION, POD_PHASE_RUNNING,
};
use crate::error::ControllerError;
use tracing::{debug, info};

impl Reconciler {
    /// Publishes the address of a Running load-balancer pod on the Service
    /// it serves.
    ///
    /// Pods without the managed annotation, or not yet Running, are ignored;
    /// the next phase transition triggers another pass. Once the pod is
    /// Running, its back-reference to the Service and its Node must resolve.
    pub async fn reconcile_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let pod_ref = qualified(namespace, name);
        let pod = match self.store.get_pod(namespace, name).await {
            Ok(pod) => pod,
            Err(e) if e.is_not_found() => {
                debug!("Pod {} not found, nothing to do", pod_ref);
                return Ok(());
            }
            Err(e) => return Err(ControllerError::store("fetch Pod", pod_ref, e)),
        };

        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        if !annotations.contains_key(MANAGED_ANNOTATION) {
            return Ok(());
        }

        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some(POD_PHASE_RUNNING) {
            debug!("Pod {} is {:?}, waiting for Running", pod_ref, phase);
            return Ok(());
        }

        let annotation = |key: &str| {
            annotations
                .get(key)
                .cloned()
                .ok_or_else(|| ControllerError::InvalidObject(format!("Pod {pod_ref} missing annotation {key}")))
        };
        let svc_namespace = annotation(LOAD_BALANCER_FOR_NAMESPACE_ANNOTATION)?;
        let svc_name = annotation(LOAD_BALANCER_FOR_NAME_ANNOTATION)?;
        let svc_ref = qualified(&svc_namespace, &svc_name);

        let mut service = self
            .store
            .get_service(&svc_namespace, &svc_name)
            .await
            .map_err(|e| ControllerError::store("fetch Service for Pod", svc_ref.clone(), e))?;

        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ControllerError::InvalidObject(format!("Running Pod {pod_ref} has no node")))?;
        let node = self
            .store
            .get_node(node_name)
            .await
            .map_err(|e| ControllerError::store("fetch Node for Pod", node_name, e))?;

        let host_ip = pod.status.as_ref().and_then(|s| s.host_ip.as_deref()).unwrap_or_default();
        let ip = resolve_ingress_ip(host_ip, &node);

        if ingress_is(&service, &ip) {
            debug!("Service {} already published at {}", svc_ref, ip);
            return Ok(());
        }
        set_ingress(&mut service, &ip);
        self.store
            .update_service_status(&service)
            .await
            .map_err(|e| ControllerError::store("publish ingress", svc_ref.clone(), e))?;
        info!("Published {} on Service {} from Pod {}", ip, svc_ref, pod_ref);
        Ok(())
    }
}
