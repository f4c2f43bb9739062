//! Unit tests for the MachineReturnRequest reconciler

#[cfg(test)]
mod tests {
    use crate::reconciler::Reconciler;
    use crate::reconciler::return_request::{IN_PROGRESS_REQUEUE, summarize, validate_return_request};
    use crate::test_utils::*;
    use cluster_gateway::{GatewayError, MockClusterGateway, Operation};
    use crds::labels::{RETURN_REQUEST_ID, TRIGGER_UPDATE, WAITING_CLEANUP};
    use crds::{MachineEvent, MachineReturnState, ReturnPhase, types};
    use kube_runtime::controller::Action;
    use std::collections::BTreeMap;

    const REQUEST: &str = "req-12345678";

    fn setup(machines: &[&str], existing: &[&str]) -> MockClusterGateway {
        let gateway = MockClusterGateway::new();
        for pod in existing {
            gateway.insert_pod(managed_pod(pod, "grp", REQUEST, "Running", true));
        }
        gateway.insert_return_request(return_request("ret", Some("ret-0001"), machines));
        gateway
    }

    async fn reconcile(gateway: &MockClusterGateway) -> Action {
        let (ctx, _receiver) = test_context(gateway);
        let request = gateway.return_request(NAMESPACE, "ret").unwrap();
        Reconciler::new(ctx).reconcile_return_request(&request).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_request_id_fails_validation() {
        let gateway = MockClusterGateway::new();
        gateway.insert_return_request(return_request("ret", None, &["grp-0"]));

        let action = reconcile(&gateway).await;
        assert_eq!(action, Action::await_change());

        let stored = gateway.return_request(NAMESPACE, "ret").unwrap();
        assert_eq!(stored.metadata.labels.unwrap()[WAITING_CLEANUP], "True");
        let status = stored.status.unwrap();
        assert_eq!(status.phase, ReturnPhase::Failed);
        assert_eq!(status.total_machines, 0);
        assert_eq!(status.conditions[0].type_, types::FAILED);
        assert_eq!(status.conditions[0].reason, "RequestValidationFailed");
        assert!(gateway.calls_for(Operation::DeletePod).is_empty());
    }

    #[tokio::test]
    async fn test_first_pass_deletes_existing_pods() {
        let gateway = setup(&["grp-0", "grp-1", "grp-9"], &["grp-0", "grp-1"]);

        let action = reconcile(&gateway).await;
        assert_eq!(action, Action::requeue(IN_PROGRESS_REQUEUE));

        assert_eq!(gateway.successful_calls(Operation::DeletePod), 2);
        let label_patch = &gateway.calls_for(Operation::PatchPod)[0];
        assert_eq!(
            label_patch.body.as_ref().unwrap()["metadata"]["labels"][RETURN_REQUEST_ID],
            "ret-0001"
        );

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.phase, ReturnPhase::InProgress);
        assert_eq!(status.total_machines, 3);
        assert_eq!(status.returned_machines, 1);
        assert_eq!(status.failed_machines, 0);
        assert_eq!(status.machine_events["grp-0"].status, MachineReturnState::InProgress);
        assert_eq!(
            status.machine_events["grp-9"].message,
            "Pod does not exist, marked as completed"
        );
        assert_eq!(status.conditions[0].type_, types::DELETION_IN_PROGRESS);
        assert_eq!(status.conditions[0].message, "Returned 1 pods, 0 failed, 2 pending");
    }

    #[tokio::test]
    async fn test_second_pass_completes_request() {
        let gateway = setup(&["grp-0", "grp-1"], &["grp-0", "grp-1"]);
        reconcile(&gateway).await;

        let action = reconcile(&gateway).await;
        assert_eq!(action, Action::await_change());

        let stored = gateway.return_request(NAMESPACE, "ret").unwrap();
        let labels = stored.metadata.labels.unwrap();
        assert_eq!(labels[WAITING_CLEANUP], "True");
        assert!(!labels.contains_key(TRIGGER_UPDATE));
        let status = stored.status.unwrap();
        assert_eq!(status.phase, ReturnPhase::Completed);
        assert_eq!(status.returned_machines, 2);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, types::ALL_PODS_DELETED);
        assert_eq!(status.conditions[0].message, "Successfully returned all 2 pods");
        assert!(status.machine_events["grp-0"].return_completion_time.is_some());
    }

    #[tokio::test]
    async fn test_blank_machine_ids_are_not_counted() {
        let gateway = setup(&["grp-0", ""], &["grp-0"]);
        reconcile(&gateway).await;

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.total_machines, 1);
        assert_eq!(status.returned_machines, 0);
        assert!(!status.machine_events.contains_key(""));
    }

    #[tokio::test]
    async fn test_only_blank_machine_ids_fail_validation() {
        let gateway = setup(&["", " "], &[]);
        reconcile(&gateway).await;

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.phase, ReturnPhase::Failed);
        assert_eq!(status.conditions[0].reason, "RequestValidationFailed");
    }

    #[tokio::test]
    async fn test_delete_failure_gives_partial_completion() {
        let gateway = setup(&["grp-0", "grp-1"], &["grp-0"]);
        gateway.fail_next(
            Operation::DeletePod,
            GatewayError::Forbidden("pods \"grp-0\" is forbidden".to_string()),
        );

        let action = reconcile(&gateway).await;
        assert_eq!(action, Action::await_change());

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.phase, ReturnPhase::PartiallyCompleted);
        assert_eq!(status.returned_machines, 1);
        assert_eq!(status.failed_machines, 1);
        assert!(status.machine_events["grp-0"].message.starts_with("Failed to return pod"));
        assert_eq!(status.conditions[0].type_, types::SOME_PODS_DELETED);
    }

    #[tokio::test]
    async fn test_pod_gone_during_delete_counts_as_returned() {
        let gateway = setup(&["grp-0"], &["grp-0"]);
        gateway.fail_next(Operation::DeletePod, GatewayError::NotFound("grp-0".to_string()));

        reconcile(&gateway).await;

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.phase, ReturnPhase::Completed);
        assert_eq!(status.machine_events["grp-0"].message, "Pod was already returned");
    }

    #[tokio::test]
    async fn test_duplicate_machine_ids_are_counted_once() {
        let gateway = setup(&["grp-0", "grp-0"], &[]);

        reconcile(&gateway).await;

        let status = gateway.return_request(NAMESPACE, "ret").unwrap().status.unwrap();
        assert_eq!(status.total_machines, 1);
        assert_eq!(status.phase, ReturnPhase::Completed);
    }

    #[tokio::test]
    async fn test_terminal_request_is_left_alone() {
        let gateway = setup(&["grp-0"], &[]);
        reconcile(&gateway).await;
        let calls_before = gateway.calls().len();

        let action = reconcile(&gateway).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(gateway.calls().len(), calls_before);
    }

    #[test]
    fn test_validate_return_request() {
        assert!(validate_return_request(&return_request("r", Some("id"), &["a"])).is_ok());
        assert!(validate_return_request(&return_request("r", Some(""), &["a"])).is_err());
        assert!(validate_return_request(&return_request("r", Some("id"), &[])).is_err());
    }

    #[test]
    fn test_phase_is_terminal_iff_all_machines_final() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        let states = [
            MachineReturnState::Pending,
            MachineReturnState::InProgress,
            MachineReturnState::Completed,
            MachineReturnState::Failed,
        ];
        for a in states {
            for b in states {
                for c in states {
                    let events: BTreeMap<String, MachineEvent> = ids
                        .iter()
                        .zip([a, b, c])
                        .map(|(id, status)| {
                            let event = MachineEvent {
                                status,
                                message: String::new(),
                                return_request_time: None,
                                return_completion_time: None,
                            };
                            (id.clone(), event)
                        })
                        .collect();
                    let summary = summarize(&ids, &events);
                    assert!(summary.returned + summary.failed <= summary.total);
                    assert_eq!(
                        summary.phase.is_terminal(),
                        summary.returned + summary.failed == summary.total
                    );
                }
            }
        }
    }
}
