//! Unit tests for the pod delete handler

#[cfg(test)]
mod tests {
    use crate::reconciler::Reconciler;
    use crate::status_worker::StatusWorker;
    use crate::test_utils::*;
    use cluster_gateway::MockClusterGateway;
    use crds::labels::RETURN_REQUEST_ID;
    use crds::types;

    const REQUEST: &str = "req-12345678";

    #[tokio::test]
    async fn test_deleted_pod_is_recorded_as_system_return() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);

        let pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        Reconciler::new(ctx.clone()).handle_pod_deleted(&pod).await.unwrap();

        let events = receiver.try_batch(10);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        let condition = event.condition.as_ref().unwrap();
        assert_eq!(condition.type_, types::POD_RETURNED);
        assert_eq!(condition.reason, "Returned");
        assert_eq!(condition.message, "Pod grp-0 has been returned");
        assert_eq!(event.machine.as_ref().unwrap().status, "Returned");
        assert_eq!(event.returned_machines.len(), 1);
        assert_eq!(
            event.returned_machines[0].return_request_id,
            ctx.config.system_initiated_return_msg
        );
    }

    #[tokio::test]
    async fn test_return_request_label_is_used() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);

        let mut pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        if let Some(labels) = pod.metadata.labels.as_mut() {
            labels.insert(RETURN_REQUEST_ID.to_string(), "ret-42".to_string());
        }
        Reconciler::new(ctx).handle_pod_deleted(&pod).await.unwrap();

        let events = receiver.try_batch(10);
        assert_eq!(events[0].returned_machines[0].return_request_id, "ret-42");
    }

    #[tokio::test]
    async fn test_owner_resolved_from_app_label() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);

        let mut pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        pod.metadata.owner_references = None;
        Reconciler::new(ctx).handle_pod_deleted(&pod).await.unwrap();

        assert_eq!(receiver.try_batch(10)[0].resource.name, "grp");
    }

    #[tokio::test]
    async fn test_missing_owner_is_expected() {
        let gateway = MockClusterGateway::new();
        let (ctx, mut receiver) = test_context(&gateway);

        let pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        assert!(Reconciler::new(ctx).handle_pod_deleted(&pod).await.is_ok());
        assert!(receiver.try_batch(10).is_empty());
    }

    #[tokio::test]
    async fn test_missing_request_id_is_an_error() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, _receiver) = test_context(&gateway);

        let mut pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        if let Some(labels) = pod.metadata.labels.as_mut() {
            labels.remove(crds::labels::REQUEST_ID);
        }
        assert!(Reconciler::new(ctx).handle_pod_deleted(&pod).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_delete_events_record_one_return() {
        let gateway = MockClusterGateway::new();
        gateway.insert_machine_group(machine_group("grp", Some(REQUEST), 1));
        let (ctx, mut receiver) = test_context(&gateway);
        let reconciler = Reconciler::new(ctx.clone());

        let pod = managed_pod("grp-0", "grp", REQUEST, "Running", true);
        reconciler.handle_pod_deleted(&pod).await.unwrap();
        reconciler.handle_pod_deleted(&pod).await.unwrap();

        let batch = receiver.try_batch(10);
        assert_eq!(batch.len(), 2);
        let (worker_ctx, worker_receiver) = test_context(&gateway);
        StatusWorker::new(worker_ctx, worker_receiver).process_batch(batch).await;

        let status = gateway.machine_group(NAMESPACE, "grp").unwrap().status.unwrap();
        assert_eq!(status.returned_machines.len(), 1);
        assert_eq!(status.returned_machines[0].name, "grp-0");
    }
}
