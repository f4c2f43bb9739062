//! Typed cluster events
//!
//! Raw watch events for pods and nodes are turned into typed events at the
//! watcher boundary. Each tracker keeps the last seen copy of every object so
//! handlers get explicit before/after values.

use k8s_openapi::api::core::v1::{ContainerStatus, Node, Pod, Taint};
use kube::ResourceExt;
use kube_runtime::watcher::Event;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A managed pod's container statuses changed.
#[derive(Debug, Clone)]
pub struct ContainerStatusChange {
    pub pod: Pod,
    /// Statuses before the change; empty on first sight
    pub previous: Vec<ContainerStatus>,
}

impl ContainerStatusChange {
    pub fn current(&self) -> &[ContainerStatus] {
        container_statuses(&self.pod)
    }
}

/// Event from the managed-pod watch
#[derive(Debug, Clone)]
pub enum PodEvent {
    ContainerStatusChanged(ContainerStatusChange),
    Deleted(Pod),
}

/// A node's taints changed (or the node was seen for the first time).
#[derive(Debug, Clone)]
pub struct NodeTaintChange {
    pub node_name: String,
    pub labels: BTreeMap<String, String>,
    /// Taints before the change; `None` on first sight
    pub previous: Option<Vec<Taint>>,
    pub current: Vec<Taint>,
}

type PodKey = (String, String);

fn pod_key(pod: &Pod) -> PodKey {
    (pod.namespace().unwrap_or_default(), pod.name_any())
}

pub(crate) fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
}

/// Turns pod watch events into [`PodEvent`]s.
///
/// Pods that vanish across a watch re-list without a delete event are
/// reported as deleted when the re-list completes.
#[derive(Debug, Default)]
pub struct PodTracker {
    known: HashMap<PodKey, Pod>,
    relisted: Option<HashSet<PodKey>>,
}

impl PodTracker {
    pub fn observe(&mut self, event: Event<Pod>) -> Vec<PodEvent> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(pod) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(pod_key(&pod));
                }
                self.apply(pod)
            }
            Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let vanished: Vec<PodKey> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                vanished
                    .into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(PodEvent::Deleted)
                    .collect()
            }
            Event::Apply(pod) => self.apply(pod),
            Event::Delete(pod) => {
                self.known.remove(&pod_key(&pod));
                vec![PodEvent::Deleted(pod)]
            }
        }
    }

    fn apply(&mut self, pod: Pod) -> Vec<PodEvent> {
        let previous = self
            .known
            .insert(pod_key(&pod), pod.clone())
            .map(|old| container_statuses(&old).to_vec())
            .unwrap_or_default();

        if previous.as_slice() == container_statuses(&pod) {
            return Vec::new();
        }
        vec![PodEvent::ContainerStatusChanged(ContainerStatusChange { pod, previous })]
    }
}

/// Turns node watch events into [`NodeTaintChange`]s.
#[derive(Debug, Default)]
pub struct NodeTracker {
    taints: HashMap<String, Vec<Taint>>,
}

impl NodeTracker {
    pub fn observe(&mut self, event: Event<Node>) -> Option<NodeTaintChange> {
        match event {
            Event::Apply(node) | Event::InitApply(node) => {
                let node_name = node.name_any();
                let current = node
                    .spec
                    .as_ref()
                    .and_then(|s| s.taints.clone())
                    .unwrap_or_default();
                let previous = self.taints.insert(node_name.clone(), current.clone());
                if previous.as_ref() == Some(&current) {
                    return None;
                }
                Some(NodeTaintChange {
                    node_name,
                    labels: node.labels().clone(),
                    previous,
                    current,
                })
            }
            Event::Delete(node) => {
                self.taints.remove(&node.name_any());
                None
            }
            Event::Init | Event::InitDone => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{node_with_taints, pod_with_container_states};

    #[test]
    fn test_first_sight_without_statuses_is_quiet() {
        let mut tracker = PodTracker::default();
        let events = tracker.observe(Event::Apply(pod_with_container_states("p", &[])));
        assert!(events.is_empty());
    }

    #[test]
    fn test_container_status_change_reports_previous() {
        let mut tracker = PodTracker::default();
        tracker.observe(Event::Apply(pod_with_container_states("p", &[("c", false)])));
        let events = tracker.observe(Event::Apply(pod_with_container_states("p", &[("c", true)])));

        assert_eq!(events.len(), 1);
        let PodEvent::ContainerStatusChanged(change) = &events[0] else {
            panic!("expected a container status change");
        };
        assert_eq!(change.previous.len(), 1);
        assert!(!change.previous[0].ready);
        assert!(change.current()[0].ready);

        let repeat = tracker.observe(Event::Apply(pod_with_container_states("p", &[("c", true)])));
        assert!(repeat.is_empty());
    }

    #[test]
    fn test_relist_reports_vanished_pods() {
        let mut tracker = PodTracker::default();
        tracker.observe(Event::Apply(pod_with_container_states("gone", &[])));
        tracker.observe(Event::Apply(pod_with_container_states("kept", &[])));

        tracker.observe(Event::Init);
        tracker.observe(Event::InitApply(pod_with_container_states("kept", &[])));
        let events = tracker.observe(Event::InitDone);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PodEvent::Deleted(pod) if pod.name_any() == "gone"));
    }

    #[test]
    fn test_node_taint_changes() {
        let mut tracker = NodeTracker::default();
        let first = tracker.observe(Event::Apply(node_with_taints("n", true, &[]))).unwrap();
        assert!(first.previous.is_none());

        assert!(tracker.observe(Event::Apply(node_with_taints("n", true, &[]))).is_none());

        let change = tracker
            .observe(Event::Apply(node_with_taints("n", true, &["node.cloudprovider.kubernetes.io/shutdown"])))
            .unwrap();
        assert_eq!(change.previous, Some(Vec::new()));
        assert_eq!(change.current.len(), 1);
    }
}
