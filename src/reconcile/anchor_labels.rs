//! Anchor Label Loop (C3, spec.md §4.3).
//!
//! For every configured anchor there is at most one node carrying
//! `<anchor>=true`, and that node is the one currently running the anchor's
//! task in `running`/`running`. Labels that differ from the target are
//! adjusted individually; the pass never pre-clears everything first —
//! that caused flapping in earlier revisions of this reconciler.

use crate::config::anchors::AnchorsMap;
use crate::metrics::Metrics;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use std::collections::HashMap;
use tracing::{error, warn};

const LABEL_VALUE: &str = "true";

fn full_name(stack: &str, short: &str) -> String {
    format!("{stack}_{short}")
}

/// Run one pass of the anchor label loop. Per-label failures are logged and
/// do not abort the rest of the pass; the function itself only returns an
/// error for a failure that prevents making any decision at all (listing
/// nodes).
pub async fn reconcile(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    anchors: &AnchorsMap,
    stack_name: &str,
    metrics: &Metrics,
) -> Result<(), OrchestratorError> {
    let mut target: HashMap<&str, Option<String>> = HashMap::new();
    for anchor in anchors.keys() {
        let location = match orchestrator.anchor_label_location(&full_name(stack_name, anchor)).await {
            Ok(loc) => loc,
            Err(OrchestratorError::NotFound(_)) => None,
            Err(e) => {
                warn!(anchor, error = %e, "failed to resolve anchor label location, treating as absent this pass");
                None
            }
        };
        target.insert(anchor.as_str(), location);
    }

    let nodes = orchestrator.list_nodes().await?;

    for node in &nodes {
        for anchor in anchors.keys() {
            let wants_label = target.get(anchor.as_str()).and_then(|t| t.as_deref()) == Some(node.id.as_str());
            let has_label = node.labels.get(anchor.as_str()).map(String::as_str) == Some(LABEL_VALUE);

            if has_label && !wants_label {
                if let Err(e) = orchestrator.remove_label(&node.id, anchor).await {
                    error!(node = %node.id, anchor, error = %e, "failed to remove anchor label");
                } else {
                    metrics.anchor_updates_total.inc();
                }
            } else if wants_label && !has_label {
                if let Err(e) = orchestrator.add_label(&node.id, anchor, LABEL_VALUE).await {
                    error!(node = %node.id, anchor, error = %e, "failed to add anchor label");
                } else {
                    metrics.anchor_updates_total.inc();
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::anchors::AnchorConfig;
    use crate::orchestrator::{NodeInfo, Task, TaskState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeOrchestrator {
        nodes: Vec<NodeInfo>,
        tasks: HashMap<String, Vec<Task>>,
        label_calls: Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn list_nodes(&self) -> Result<Vec<NodeInfo>, OrchestratorError> {
            Ok(self.nodes.clone())
        }
        async fn inspect_service(&self, _: &str) -> Result<crate::orchestrator::ServiceSpec, OrchestratorError> {
            unimplemented!()
        }
        async fn list_tasks(&self, full_name: &str) -> Result<Vec<Task>, OrchestratorError> {
            Ok(self.tasks.get(full_name).cloned().unwrap_or_default())
        }
        async fn force_update(&self, _: &str) -> Result<(), OrchestratorError> {
            unimplemented!()
        }
        async fn add_label(&self, node_id: &str, key: &str, value: &str) -> Result<(), OrchestratorError> {
            self.label_calls.lock().unwrap().push((node_id.to_string(), key.to_string(), Some(value.to_string())));
            Ok(())
        }
        async fn remove_label(&self, node_id: &str, key: &str) -> Result<(), OrchestratorError> {
            self.label_calls.lock().unwrap().push((node_id.to_string(), key.to_string(), None));
            Ok(())
        }
        async fn node_memory_bytes(&self, _: &str) -> Result<u64, OrchestratorError> {
            unimplemented!()
        }
        async fn am_leader(&self) -> Result<bool, OrchestratorError> {
            Ok(true)
        }
    }

    fn node(id: &str, labels: &[(&str, &str)]) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            hostname: id.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            memory_bytes: 0,
        }
    }

    fn running_task(node_id: &str) -> Task {
        Task {
            state: TaskState::Running,
            desired_state: TaskState::Running,
            node_id: Some(node_id.to_string()),
            timestamp: "1".into(),
            message: None,
        }
    }

    fn anchors_with(name: &str) -> AnchorsMap {
        HashMap::from([(
            name.to_string(),
            AnchorConfig {
                name: name.to_string(),
                dependents: vec![],
                retry_intervals: vec![2, 10],
                restart_dependents: false,
                max_mismatch_seconds: 600,
            },
        )])
    }

    #[tokio::test]
    async fn labels_node_running_the_anchor() {
        let orch = FakeOrchestrator {
            nodes: vec![node("x", &[]), node("y", &[])],
            tasks: HashMap::from([("stack_db".to_string(), vec![running_task("x")])]),
            label_calls: Mutex::new(vec![]),
        };
        let metrics = Metrics::new();
        reconcile(&orch, &anchors_with("db"), "stack", &metrics).await.unwrap();
        let calls = orch.label_calls.into_inner().unwrap();
        assert_eq!(calls, vec![("x".to_string(), "db".to_string(), Some("true".to_string()))]);
    }

    #[tokio::test]
    async fn removes_stale_label_when_anchor_moved() {
        let orch = FakeOrchestrator {
            nodes: vec![node("x", &[("db", "true")]), node("y", &[])],
            tasks: HashMap::from([("stack_db".to_string(), vec![running_task("y")])]),
            label_calls: Mutex::new(vec![]),
        };
        let metrics = Metrics::new();
        reconcile(&orch, &anchors_with("db"), "stack", &metrics).await.unwrap();
        let calls = orch.label_calls.into_inner().unwrap();
        assert!(calls.contains(&("x".to_string(), "db".to_string(), None)));
        assert!(calls.contains(&("y".to_string(), "db".to_string(), Some("true".to_string()))));
    }

    #[tokio::test]
    async fn no_running_task_clears_label_and_applies_none() {
        let orch = FakeOrchestrator {
            nodes: vec![node("x", &[("db", "true")])],
            tasks: HashMap::new(),
            label_calls: Mutex::new(vec![]),
        };
        let metrics = Metrics::new();
        reconcile(&orch, &anchors_with("db"), "stack", &metrics).await.unwrap();
        let calls = orch.label_calls.into_inner().unwrap();
        assert_eq!(calls, vec![("x".to_string(), "db".to_string(), None)]);
    }

    #[tokio::test]
    async fn already_correct_label_is_left_alone() {
        let orch = FakeOrchestrator {
            nodes: vec![node("x", &[("db", "true")])],
            tasks: HashMap::from([("stack_db".to_string(), vec![running_task("x")])]),
            label_calls: Mutex::new(vec![]),
        };
        let metrics = Metrics::new();
        reconcile(&orch, &anchors_with("db"), "stack", &metrics).await.unwrap();
        assert!(orch.label_calls.into_inner().unwrap().is_empty());
    }
}
