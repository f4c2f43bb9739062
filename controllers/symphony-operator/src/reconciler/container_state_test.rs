//! Unit tests for the container state handler

#[cfg(test)]
mod tests {
    use crate::events::ContainerStatusChange;
    use crate::reconciler::Reconciler;
    use crate::reconciler::container_state::{container_health, containers_changed};
    use crate::test_utils::*;
    use cluster_gateway::{GatewayError, MockClusterGateway, Operation};
    use crds::types;
    use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

    const REQUEST: &str = "req-12345678";

    fn statuses(containers: &[(&str, bool)]) -> Vec<ContainerStatus> {
        pod_with_container_states("x", containers)
            .status
            .and_then(|s| s.container_statuses)
            .unwrap_or_default()
    }

    fn managed_with_containers(containers: &[(&str, bool)]) -> Pod {
        let mut pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        if let Some(status) = pod.status.as_mut() {
            status.container_statuses = Some(statuses(containers));
        }
        pod
    }

    #[tokio::test]
    async fn test_ready_containers_enqueue_healthy_condition() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);

        let change = ContainerStatusChange {
            pod: managed_with_containers(&[("worker", true), ("sidecar", true)]),
            previous: statuses(&[("worker", false), ("sidecar", true)]),
        };
        Reconciler::new(ctx).handle_container_status_change(&change).await.unwrap();

        let events = receiver.try_batch(10);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.resource.name, "grp");
        assert_eq!(event.request_id, REQUEST);
        let condition = event.condition.as_ref().unwrap();
        assert_eq!(condition.type_, types::CONTAINER_HEALTH);
        assert!(condition.is_true());
        assert_eq!(condition.message, "All containers in pod grp-0 are ready");
        let machine = event.machine.as_ref().unwrap();
        assert_eq!(machine.name, "grp-0");
        assert_eq!(machine.status, "Running");
    }

    #[tokio::test]
    async fn test_unchanged_states_are_ignored() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);

        let change = ContainerStatusChange {
            pod: managed_with_containers(&[("worker", true)]),
            previous: statuses(&[("worker", true)]),
        };
        Reconciler::new(ctx).handle_container_status_change(&change).await.unwrap();

        assert!(receiver.try_batch(10).is_empty());
        assert!(gateway.calls_for(Operation::GetMachineGroup).is_empty());
    }

    #[tokio::test]
    async fn test_pod_without_request_id_is_ignored() {
        let gateway = MockClusterGateway::new();
        let (ctx, mut receiver) = test_context(&gateway);

        let mut pod = managed_with_containers(&[("worker", true)]);
        if let Some(labels) = pod.metadata.labels.as_mut() {
            labels.remove(crds::labels::REQUEST_ID);
        }
        let change = ContainerStatusChange { pod, previous: Vec::new() };
        Reconciler::new(ctx).handle_container_status_change(&change).await.unwrap();

        assert!(receiver.try_batch(10).is_empty());
    }

    #[tokio::test]
    async fn test_unmanaged_pod_is_ignored() {
        let gateway = MockClusterGateway::new();
        let (ctx, mut receiver) = test_context(&gateway);

        let mut pod = managed_with_containers(&[("worker", true)]);
        if let Some(labels) = pod.metadata.labels.as_mut() {
            labels.insert(crds::labels::MANAGED_BY.to_string(), "someone-else".to_string());
        }
        let change = ContainerStatusChange { pod, previous: Vec::new() };
        Reconciler::new(ctx).handle_container_status_change(&change).await.unwrap();

        assert!(receiver.try_batch(10).is_empty());
    }

    #[tokio::test]
    async fn test_missing_owner_is_not_an_error() {
        let gateway = MockClusterGateway::new();
        let (ctx, mut receiver) = test_context(&gateway);

        let change = ContainerStatusChange {
            pod: managed_with_containers(&[("worker", false)]),
            previous: Vec::new(),
        };
        let result = Reconciler::new(ctx).handle_container_status_change(&change).await;

        assert!(result.is_ok());
        assert!(receiver.try_batch(10).is_empty());
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_is_surfaced() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        gateway.fail_next(
            Operation::GetMachineGroup,
            GatewayError::Transient {
                code: Some(503),
                message: "unavailable".to_string(),
            },
        );
        let (ctx, _receiver) = test_context(&gateway);

        let change = ContainerStatusChange {
            pod: managed_with_containers(&[("worker", false)]),
            previous: Vec::new(),
        };
        assert!(Reconciler::new(ctx).handle_container_status_change(&change).await.is_err());
    }

    #[test]
    fn test_containers_changed() {
        assert!(containers_changed(&[], &statuses(&[("a", false)])));
        assert!(containers_changed(&statuses(&[("a", false)]), &statuses(&[("a", true)])));
        assert!(!containers_changed(&statuses(&[("a", true)]), &statuses(&[("a", true)])));
        assert!(!containers_changed(&statuses(&[("a", true)]), &[]));
    }

    #[test]
    fn test_container_health_without_containers_is_not_ready() {
        let condition = container_health("p", &[]);
        assert!(!condition.is_true());
        assert_eq!(condition.reason, "ContainersNotReady");
        assert_eq!(condition.message, "Not all containers in pod p are ready");
    }
}
