//! Service reconciler
//!
//! The Service lifecycle is derived from the object on every pass through
//! [`classify`]:
//!
//! - `Deleting`: delete the Deployment, then release the finalizer
//! - `NotLoadBalancer`: delete any stale Deployment, finalizer and ingress
//! - `Converging`: finalizer, Deployment, rollout wait, ingress publish
//!
//! Deployment deletion always precedes finalizer removal, so a crash
//! between the two leaves the finalizer in place for the next pass.

use super::{Reconciler, clear_ingress, ingress_is, qualified, resolve_ingress_ip, set_ingress};
use crate::constants::{FINALIZER_NAME, NAMESPACE};
use crate::error::ControllerError;
use crate::readiness::wait_for_deployment_complete;
use crate::workload::{
    ServicePhase, classify, deployment_matches, deployment_name, deployment_update, desired_deployment, has_finalizer,
    pod_selector,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Drives the load-balancer workload of `namespace/name` toward the
    /// state its Service asks for.
    pub async fn reconcile_service(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let svc_ref = qualified(namespace, name);
        let service = match self.store.get_service(namespace, name).await {
            Ok(service) => service,
            Err(e) if e.is_not_found() => {
                debug!("Service {} not found, nothing to do", svc_ref);
                return Ok(());
            }
            Err(e) => return Err(ControllerError::store("fetch Service", svc_ref, e)),
        };

        let phase = classify(&service);
        debug!("Reconciling Service {} in phase {:?}", svc_ref, phase);
        match phase {
            ServicePhase::Deleting => self.finalize_service(service, &svc_ref).await,
            ServicePhase::NotLoadBalancer => self.remove_stale_workload(service, &svc_ref).await,
            ServicePhase::Converging => self.converge_service(service, &svc_ref).await,
        }
    }

    /// Looks up the derived-name Deployment; `None` when it does not exist.
    async fn find_deployment(&self, service: &Service) -> Result<Option<Deployment>, ControllerError> {
        let name = deployment_name(service);
        match self.store.get_deployment(NAMESPACE, &name).await {
            Ok(deployment) => Ok(Some(deployment)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ControllerError::store("fetch Deployment", qualified(NAMESPACE, &name), e)),
        }
    }

    async fn delete_workload(&self, service: &Service) -> Result<(), ControllerError> {
        let name = deployment_name(service);
        match self.store.delete_deployment(NAMESPACE, &name).await {
            Ok(()) => {
                info!("Deleted Deployment {}", qualified(NAMESPACE, &name));
                Ok(())
            }
            // Someone else finished the job between our read and delete
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ControllerError::store("delete Deployment", qualified(NAMESPACE, &name), e)),
        }
    }

    async fn release_finalizer(&self, mut service: Service, svc_ref: &str) -> Result<Service, ControllerError> {
        if let Some(finalizers) = service.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != FINALIZER_NAME);
        }
        let updated = self
            .store
            .update_service(&service)
            .await
            .map_err(|e| ControllerError::store("remove finalizer", svc_ref, e))?;
        info!("Removed finalizer from Service {}", svc_ref);
        Ok(updated)
    }

    async fn finalize_service(&self, service: Service, svc_ref: &str) -> Result<(), ControllerError> {
        if !has_finalizer(&service) {
            debug!("Service {} is being deleted without our finalizer", svc_ref);
            return Ok(());
        }

        if self.find_deployment(&service).await?.is_some() {
            self.delete_workload(&service).await?;
        } else {
            debug!("Service {} has no Deployment left", svc_ref);
        }
        self.release_finalizer(service, svc_ref).await?;
        Ok(())
    }

    async fn remove_stale_workload(&self, mut service: Service, svc_ref: &str) -> Result<(), ControllerError> {
        if self.find_deployment(&service).await?.is_some() {
            info!("Service {} is no longer a LoadBalancer, removing its workload", svc_ref);
            self.delete_workload(&service).await?;
        }
        if has_finalizer(&service) {
            service = self.release_finalizer(service, svc_ref).await?;
        }
        if clear_ingress(&mut service) {
            self.store
                .update_service_status(&service)
                .await
                .map_err(|e| ControllerError::store("clear ingress", svc_ref, e))?;
            info!("Cleared published ingress of Service {}", svc_ref);
        }
        Ok(())
    }

    async fn converge_service(&self, mut service: Service, svc_ref: &str) -> Result<(), ControllerError> {
        if !has_finalizer(&service) {
            service
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER_NAME.to_string());
            service = self
                .store
                .update_service(&service)
                .await
                .map_err(|e| ControllerError::store("register finalizer", svc_ref, e))?;
            info!("Registered finalizer on Service {}", svc_ref);
        }

        let name = deployment_name(&service);
        let deployment_ref = qualified(NAMESPACE, &name);
        let desired = desired_deployment(&service);

        match self.find_deployment(&service).await? {
            None => {
                self.store
                    .create_deployment(&desired)
                    .await
                    .map_err(|e| ControllerError::store("create Deployment", deployment_ref.clone(), e))?;
                info!("Created Deployment {} for Service {}", deployment_ref, svc_ref);
            }
            Some(existing) if deployment_matches(&existing, &desired) => {
                debug!("Deployment {} already up-to-date", deployment_ref);
            }
            Some(existing) => {
                self.store
                    .update_deployment(&deployment_update(&existing, &desired))
                    .await
                    .map_err(|e| ControllerError::store("update Deployment", deployment_ref.clone(), e))?;
                info!("Updated Deployment {} for Service {}", deployment_ref, svc_ref);
            }
        }

        wait_for_deployment_complete(
            self.store.as_ref(),
            NAMESPACE,
            &name,
            self.rollout_poll_interval,
            self.rollout_timeout,
            &self.shutdown,
        )
        .await?;

        let pods = self
            .store
            .list_pods(NAMESPACE, &pod_selector(&service))
            .await
            .map_err(|e| ControllerError::store("list workload pods", deployment_ref.clone(), e))?;
        let Some(pod) = pods.first() else {
            return Err(ControllerError::NoWorkloadPods(deployment_ref));
        };
        if pods.len() > 1 {
            warn!(
                "Deployment {} has {} pods, publishing the first listed",
                deployment_ref,
                pods.len()
            );
        }

        let pod_name = pod.metadata.name.as_deref().unwrap_or("<unknown>");
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ControllerError::InvalidObject(format!("workload Pod {pod_name} has no node")))?;
        let node = self
            .store
            .get_node(node_name)
            .await
            .map_err(|e| ControllerError::store("fetch Node for workload pod", node_name, e))?;
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
            .map_err(|e| ControllerError::store("publish ingress", svc_ref, e))?;
        info!("Published {} on Service {}", ip, svc_ref);
        Ok(())
    }
}
