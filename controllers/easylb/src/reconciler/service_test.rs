//! Unit tests for the Service reconciler

#[cfg(test)]
mod tests {
    use crate::constants::{FINALIZER_NAME, NAMESPACE};
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use crate::workload::{desired_deployment, has_finalizer};
    use cluster_store::{MockClusterStore, ObjectKind, Operation, WriteRecord};
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    const DEPLOYMENT: &str = "easylb-lb-ns-foo";

    fn published_ip(store: &MockClusterStore) -> Option<String> {
        store
            .service("ns", "foo")
            .and_then(|s| s.status)
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .and_then(|ingress| ingress.into_iter().next())
            .and_then(|i| i.ip)
    }

    fn rolled_out_store() -> MockClusterStore {
        let store = MockClusterStore::new().with_rollout("worker-1", "192.168.1.2");
        store.add_service(create_http_service());
        store.add_node(create_test_node(
            "worker-1",
            &[("InternalIP", "192.168.1.2"), ("ExternalIP", "203.0.113.9")],
            &[],
        ));
        store
    }

    fn write(operation: Operation, kind: ObjectKind, key: &str) -> WriteRecord {
        WriteRecord {
            operation,
            kind,
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_balancer_service_converges() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("reconcile");

        let deployment = store.deployment(NAMESPACE, DEPLOYMENT).expect("deployment created");
        let container = &deployment.spec.expect("spec").template.spec.expect("pod spec").containers[0];
        assert_eq!(container.args, Some(vec!["10.0.0.5 80 tcp ".to_string()]));
        let port = &container.ports.as_ref().expect("ports")[0];
        assert_eq!((port.container_port, port.host_port), (80, Some(80)));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));

        let svc = store.service("ns", "foo").expect("service");
        assert!(has_finalizer(&svc));
        assert_eq!(published_ip(&store), Some("203.0.113.9".to_string()));

        assert_eq!(
            store.writes(),
            vec![
                write(Operation::Update, ObjectKind::Service, "ns/foo"),
                write(Operation::Create, ObjectKind::Deployment, "easylb-system/easylb-lb-ns-foo"),
                write(Operation::UpdateStatus, ObjectKind::Service, "ns/foo"),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("first pass");
        store.clear_writes();
        reconciler.reconcile_service("ns", "foo").await.expect("second pass");

        assert!(store.writes().is_empty(), "unexpected writes: {:?}", store.writes());
        assert_eq!(store.deployments().len(), 1);
    }

    fn revision(store: &MockClusterStore) -> Option<String> {
        store
            .deployment(NAMESPACE, DEPLOYMENT)
            .and_then(|d| d.metadata.annotations)
            .and_then(|a| a.get("deployment.kubernetes.io/revision").cloned())
    }

    fn deployment_updates(store: &MockClusterStore) -> usize {
        store
            .writes()
            .iter()
            .filter(|w| w.kind == ObjectKind::Deployment && w.operation == Operation::Update)
            .count()
    }

    #[tokio::test]
    async fn test_server_populated_deployment_is_not_rewritten() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);
        reconciler.reconcile_service("ns", "foo").await.expect("converge");

        // The Deployment controller bumps its revision annotation between passes
        for pass in 1..=3 {
            let mut stored = store.deployment(NAMESPACE, DEPLOYMENT).expect("deployment");
            apply_server_defaults(&mut stored);
            if let Some(annotations) = stored.metadata.annotations.as_mut() {
                annotations.insert("deployment.kubernetes.io/revision".to_string(), pass.to_string());
            }
            store.add_deployment(stored);
            store.clear_writes();

            reconciler.reconcile_service("ns", "foo").await.expect("reconcile");

            assert!(store.writes().is_empty(), "pass {pass} wrote {:?}", store.writes());
            assert_eq!(revision(&store), Some(pass.to_string()));
        }
    }

    #[tokio::test]
    async fn test_drift_repair_keeps_server_annotations() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);
        reconciler.reconcile_service("ns", "foo").await.expect("converge");

        let mut stored = store.deployment(NAMESPACE, DEPLOYMENT).expect("deployment");
        apply_server_defaults(&mut stored);
        if let Some(spec) = stored.spec.as_mut() {
            spec.replicas = Some(3);
        }
        store.add_deployment(stored);
        store.clear_writes();

        reconciler.reconcile_service("ns", "foo").await.expect("repair");
        assert_eq!(deployment_updates(&store), 1);
        assert_eq!(revision(&store), Some("1".to_string()));
        let replicas = store
            .deployment(NAMESPACE, DEPLOYMENT)
            .and_then(|d| d.spec)
            .and_then(|s| s.replicas);
        assert_eq!(replicas, Some(1));

        store.clear_writes();
        reconciler.reconcile_service("ns", "foo").await.expect("settled");
        assert_eq!(deployment_updates(&store), 0);
    }

    #[tokio::test]
    async fn test_node_without_external_address_publishes_host_ip() {
        let store = MockClusterStore::new().with_rollout("worker-2", "192.168.1.3");
        store.add_service(create_http_service());
        store.add_node(create_test_node("worker-2", &[("InternalIP", "192.168.1.3")], &[]));
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("reconcile");
        assert_eq!(published_ip(&store), Some("192.168.1.3".to_string()));
    }

    #[tokio::test]
    async fn test_drifted_deployment_is_repaired() {
        let store = rolled_out_store();
        let mut drifted = desired_deployment(&create_http_service());
        if let Some(spec) = drifted.spec.as_mut() {
            spec.replicas = Some(3);
        }
        store.add_deployment(drifted);
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("reconcile");

        let deployment = store.deployment(NAMESPACE, DEPLOYMENT).expect("deployment");
        assert_eq!(deployment.spec.and_then(|s| s.replicas), Some(1));
        assert!(
            store
                .writes()
                .contains(&write(Operation::Update, ObjectKind::Deployment, "easylb-system/easylb-lb-ns-foo"))
        );
    }

    #[tokio::test]
    async fn test_type_change_removes_workload() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);
        reconciler.reconcile_service("ns", "foo").await.expect("converge");

        let mut svc = store.service("ns", "foo").expect("service");
        if let Some(spec) = svc.spec.as_mut() {
            spec.type_ = Some("ClusterIP".to_string());
        }
        store.add_service(svc);

        reconciler.reconcile_service("ns", "foo").await.expect("remove");
        reconciler.reconcile_service("ns", "foo").await.expect("stays removed");

        assert!(store.deployment(NAMESPACE, DEPLOYMENT).is_none());
        assert!(store.pod(NAMESPACE, "easylb-lb-ns-foo-0").is_none());
        let svc = store.service("ns", "foo").expect("service kept");
        assert!(!has_finalizer(&svc));
        assert!(published_ip(&store).is_none());
    }

    #[tokio::test]
    async fn test_cluster_ip_service_is_left_alone() {
        let store = MockClusterStore::new();
        store.add_service(create_test_service(
            "ns",
            "foo",
            "ClusterIP",
            vec![service_port("http", 80, "TCP")],
            "10.0.0.5",
        ));
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("reconcile");
        assert!(store.writes().is_empty());
        assert!(store.deployments().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_removes_deployment_before_finalizer() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);
        reconciler.reconcile_service("ns", "foo").await.expect("converge");
        store.mark_service_for_deletion("ns", "foo").expect("mark");
        store.clear_writes();

        reconciler.reconcile_service("ns", "foo").await.expect("finalize");

        assert_eq!(
            store.writes(),
            vec![
                write(Operation::Delete, ObjectKind::Deployment, "easylb-system/easylb-lb-ns-foo"),
                write(Operation::Update, ObjectKind::Service, "ns/foo"),
            ]
        );
        assert!(store.service("ns", "foo").is_none());
        assert!(store.deployments().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_deletion_keeps_finalizer_until_retry() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);
        reconciler.reconcile_service("ns", "foo").await.expect("converge");
        store.mark_service_for_deletion("ns", "foo").expect("mark");

        store.fail_next(Operation::Update, ObjectKind::Service);
        let err = reconciler.reconcile_service("ns", "foo").await.expect_err("finalizer write fails");
        assert!(matches!(err, ControllerError::Store { op: "remove finalizer", .. }));

        let svc = store.service("ns", "foo").expect("still present");
        assert!(svc.metadata.finalizers.as_ref().is_some_and(|f| f.iter().any(|f| f == FINALIZER_NAME)));
        assert!(store.deployment(NAMESPACE, DEPLOYMENT).is_none());

        reconciler.reconcile_service("ns", "foo").await.expect("retry");
        assert!(store.service("ns", "foo").is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizer_is_noop() {
        let store = MockClusterStore::new();
        let mut svc = create_http_service();
        svc.metadata.finalizers = Some(vec!["example.com/other".to_string()]);
        store.add_service(svc);
        store.mark_service_for_deletion("ns", "foo").expect("mark");
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "foo").await.expect("reconcile");
        assert!(store.writes().is_empty());
        assert!(store.service("ns", "foo").is_some());
    }

    #[tokio::test]
    async fn test_missing_service_is_noop() {
        let store = MockClusterStore::new();
        let reconciler = create_test_reconciler(&store);

        reconciler.reconcile_service("ns", "gone").await.expect("reconcile");
        assert!(store.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_rollout_times_out() {
        let store = MockClusterStore::new();
        store.add_service(create_http_service());
        let reconciler = create_test_reconciler(&store);

        let err = reconciler.reconcile_service("ns", "foo").await.expect_err("timeout");
        match err {
            ControllerError::RolloutTimeout { name, last_status } => {
                assert!(name.contains(DEPLOYMENT), "{name}");
                assert!(last_status.contains("status=<none>"), "{last_status}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(published_ip(&store).is_none());
    }

    #[tokio::test]
    async fn test_complete_rollout_without_pods_is_an_error() {
        let store = MockClusterStore::new();
        store.add_service(create_http_service());
        let mut deployment = desired_deployment(&create_http_service());
        deployment.status = Some(DeploymentStatus {
            replicas: Some(1),
            updated_replicas: Some(1),
            available_replicas: Some(1),
            observed_generation: Some(1),
            ..Default::default()
        });
        store.add_deployment(deployment);
        let reconciler = create_test_reconciler(&store);

        let err = reconciler.reconcile_service("ns", "foo").await.expect_err("no pods");
        assert!(matches!(err, ControllerError::NoWorkloadPods(_)));
    }

    #[tokio::test]
    async fn test_create_failure_is_hard_error() {
        let store = rolled_out_store();
        store.fail_next(Operation::Create, ObjectKind::Deployment);
        let reconciler = create_test_reconciler(&store);

        let err = reconciler.reconcile_service("ns", "foo").await.expect_err("create fails");
        assert!(matches!(err, ControllerError::Store { op: "create Deployment", .. }));
        assert!(published_ip(&store).is_none());

        reconciler.reconcile_service("ns", "foo").await.expect("retry converges");
        assert_eq!(published_ip(&store), Some("203.0.113.9".to_string()));
    }

    #[tokio::test]
    async fn test_stale_service_conflicts() {
        let store = rolled_out_store();
        let reconciler = create_test_reconciler(&store);

        let stale = store.service("ns", "foo").expect("service");
        reconciler.reconcile_service("ns", "foo").await.expect("converge");

        // A writer holding the pre-reconcile copy loses the race
        let err = cluster_store::ClusterStore::update_service(&store, &stale)
            .await
            .expect_err("conflict");
        assert!(err.is_conflict());
    }
}
