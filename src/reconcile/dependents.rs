//! Dependent Placement Loop (C4, spec.md §4.4).
//!
//! For every `(anchor, dependent)` pair, pushes the dependent back onto the
//! anchor's node once it has drifted away, subject to the dependent's
//! cooldown schedule (via [`crate::retry::RetryState`]) and an absolute
//! mismatch-duration cap. The mismatch map is this loop's exclusive,
//! non-persisted state: it lives only as long as the process.

use crate::config::anchors::AnchorsMap;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::retry::{Clock, RetryState};
use std::collections::HashMap;
use tracing::{error, warn};

fn full_name(stack: &str, short: &str) -> String {
    format!("{stack}_{short}")
}

/// Tracks, per dependent, when it was first observed off its anchor's node.
/// Owned exclusively by the caller of [`reconcile`] and threaded across
/// passes; spec.md §3 requires this map is *not* persisted to disk.
#[derive(Default)]
pub struct MismatchTracker {
    first_observed: HashMap<String, i64>,
}

impl MismatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self, dependent: &str) {
        self.first_observed.remove(dependent);
    }

    fn observe(&mut self, dependent: &str, now: i64) -> i64 {
        *self.first_observed.entry(dependent.to_string()).or_insert(now)
    }
}

/// Run one pass of the dependent placement loop. Anchors and dependents are
/// processed in the order given (the caller is expected to pass them in
/// configuration order). A per-item failure is logged and never aborts the
/// rest of the pass.
pub async fn reconcile(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    anchors: &[(&String, &crate::config::anchors::AnchorConfig)],
    stack_name: &str,
    retry: &RetryState,
    mismatch: &mut MismatchTracker,
    clock: &dyn Clock,
    metrics: &Metrics,
) {
    let now = clock.now_unix();

    for (anchor_short, anchor) in anchors {
        let anchor_full = full_name(stack_name, anchor_short);
        let observation = orchestrator.anchor_location(&anchor_full).await;

        let (anchor_state, anchor_node) = match observation {
            Ok(obs) => obs,
            Err(crate::orchestrator::OrchestratorError::NotFound(_)) => {
                handle_anchor_down(orchestrator, anchor_short, &anchor_full, anchor, stack_name, retry, metrics).await;
                continue;
            }
            Err(e) => {
                warn!(anchor = %anchor_short, error = %e, "failed to observe anchor, skipping this pass");
                continue;
            }
        };

        if anchor_state.is_waiting() {
            continue;
        }
        if anchor_state.is_failure() || anchor_node.is_none() {
            handle_anchor_down(orchestrator, anchor_short, &anchor_full, anchor, stack_name, retry, metrics).await;
            continue;
        }

        let anchor_node = anchor_node.expect("checked above");

        for dependent in &anchor.dependents {
            let dependent_full = full_name(stack_name, dependent);
            let dep_observation = orchestrator.anchor_location(&dependent_full).await;
            let (dep_state, dep_node) = match dep_observation {
                Ok(obs) => obs,
                Err(crate::orchestrator::OrchestratorError::NotFound(_)) => (crate::orchestrator::TaskState::New, None),
                Err(e) => {
                    warn!(dependent, error = %e, "failed to observe dependent, skipping this dependent");
                    continue;
                }
            };

            let Some(dep_node) = dep_node else { continue };
            if dep_state.is_ignored() || dep_state.is_waiting() {
                continue;
            }

            if dep_node == anchor_node {
                retry.clear(dependent);
                mismatch.clear(dependent);
                continue;
            }

            let first = mismatch.observe(dependent, now);
            let elapsed = now - first;
            if elapsed >= anchor.max_mismatch_seconds as i64 {
                continue;
            }
            if retry.should_retry(dependent, &anchor.retry_intervals) {
                retry.record_attempt(dependent, false);
                match orchestrator.force_update(&dependent_full).await {
                    Ok(()) => metrics.dependent_updates_total.inc(),
                    Err(e) => error!(dependent, error = %e, "force_update failed for mismatched dependent"),
                }
            }
        }
    }
}

async fn handle_anchor_down(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    anchor_short: &str,
    anchor_full: &str,
    anchor: &crate::config::anchors::AnchorConfig,
    stack_name: &str,
    retry: &RetryState,
    metrics: &Metrics,
) {
    if retry.should_retry(anchor_short, &anchor.retry_intervals) {
        retry.record_attempt(anchor_short, false);
        if let Err(e) = orchestrator.force_update(anchor_full).await {
            error!(anchor = anchor_short, error = %e, "force_update failed for down anchor");
        }
    }
    if anchor.restart_dependents {
        for dependent in &anchor.dependents {
            if retry.should_retry(dependent, &anchor.retry_intervals) {
                retry.record_attempt(dependent, false);
                match orchestrator.force_update(&full_name(stack_name, dependent)).await {
                    Ok(()) => metrics.dependent_updates_total.inc(),
                    Err(e) => error!(dependent, error = %e, "force_update failed while restarting dependent of down anchor"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::anchors::AnchorConfig;
    use crate::orchestrator::{NodeInfo, OrchestratorError, OrchestratorResult, ServiceSpec, Task, TaskState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedClock(i64);
    impl Clock for FixedClock {
        fn now_unix(&self) -> i64 {
            self.0
        }
    }

    struct FakeOrchestrator {
        tasks: Mutex<HashMap<String, Vec<Task>>>,
        force_updates: Mutex<Vec<String>>,
    }

    impl FakeOrchestrator {
        fn new() -> Self {
            Self { tasks: Mutex::new(HashMap::new()), force_updates: Mutex::new(vec![]) }
        }
        fn set_task(&self, full_name: &str, state: TaskState, node_id: Option<&str>) {
            self.tasks.lock().unwrap().insert(
                full_name.to_string(),
                vec![Task {
                    state,
                    desired_state: TaskState::Running,
                    node_id: node_id.map(str::to_string),
                    timestamp: "1".into(),
                    message: None,
                }],
            );
        }
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn list_nodes(&self) -> OrchestratorResult<Vec<NodeInfo>> {
            unimplemented!()
        }
        async fn inspect_service(&self, _: &str) -> OrchestratorResult<ServiceSpec> {
            unimplemented!()
        }
        async fn list_tasks(&self, full_name: &str) -> OrchestratorResult<Vec<Task>> {
            match self.tasks.lock().unwrap().get(full_name) {
                Some(tasks) => Ok(tasks.clone()),
                None => Err(OrchestratorError::NotFound(full_name.to_string())),
            }
        }
        async fn force_update(&self, full_name: &str) -> OrchestratorResult<()> {
            self.force_updates.lock().unwrap().push(full_name.to_string());
            Ok(())
        }
        async fn add_label(&self, _: &str, _: &str, _: &str) -> OrchestratorResult<()> {
            unimplemented!()
        }
        async fn remove_label(&self, _: &str, _: &str) -> OrchestratorResult<()> {
            unimplemented!()
        }
        async fn node_memory_bytes(&self, _: &str) -> OrchestratorResult<u64> {
            unimplemented!()
        }
        async fn am_leader(&self) -> OrchestratorResult<bool> {
            Ok(true)
        }
    }

    fn anchor(name: &str, dependents: &[&str], max_mismatch: u64) -> AnchorConfig {
        AnchorConfig {
            name: name.to_string(),
            dependents: dependents.iter().map(|s| s.to_string()).collect(),
            retry_intervals: vec![2, 10],
            restart_dependents: false,
            max_mismatch_seconds: max_mismatch,
        }
    }

    fn retry_state(dir: &std::path::Path) -> RetryState {
        RetryState::load(dir.join("retry.json"))
    }

    #[tokio::test]
    async fn colocated_dependent_triggers_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let orch = FakeOrchestrator::new();
        orch.set_task("stack_db", TaskState::Running, Some("x"));
        orch.set_task("stack_web", TaskState::Running, Some("x"));
        let db = anchor("db", &["web"], 600);
        let retry = retry_state(dir.path());
        let mut mismatch = MismatchTracker::new();
        let metrics = Metrics::new();
        reconcile(&orch, &[(&"db".to_string(), &db)], "stack", &retry, &mut mismatch, &FixedClock(0), &metrics).await;
        assert!(orch.force_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_dependent_gets_force_updated_on_first_pass() {
        let dir = tempfile::tempdir().unwrap();
        let orch = FakeOrchestrator::new();
        orch.set_task("stack_db", TaskState::Running, Some("x"));
        orch.set_task("stack_web", TaskState::Running, Some("y"));
        let db = anchor("db", &["web"], 600);
        let retry = retry_state(dir.path());
        let mut mismatch = MismatchTracker::new();
        let metrics = Metrics::new();
        reconcile(&orch, &[(&"db".to_string(), &db)], "stack", &retry, &mut mismatch, &FixedClock(0), &metrics).await;
        assert_eq!(orch.force_updates.lock().unwrap().as_slice(), ["stack_web"]);
    }

    #[tokio::test]
    async fn mismatch_beyond_cap_is_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let orch = FakeOrchestrator::new();
        orch.set_task("stack_db", TaskState::Running, Some("x"));
        orch.set_task("stack_web", TaskState::Running, Some("y"));
        let db = anchor("db", &["web"], 5);
        let retry = retry_state(dir.path());
        let mut mismatch = MismatchTracker::new();
        let metrics = Metrics::new();
        reconcile(&orch, &[(&"db".to_string(), &db)], "stack", &retry, &mut mismatch, &FixedClock(0), &metrics).await;
        orch.force_updates.lock().unwrap().clear();
        reconcile(&orch, &[(&"db".to_string(), &db)], "stack", &retry, &mut mismatch, &FixedClock(10), &metrics).await;
        assert!(orch.force_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn anchor_in_waiting_state_takes_no_action() {
        let dir = tempfile::tempdir().unwrap();
        let orch = FakeOrchestrator::new();
        orch.set_task("stack_db", TaskState::Starting, Some("x"));
        let db = anchor("db", &["web"], 600);
        let retry = retry_state(dir.path());
        let mut mismatch = MismatchTracker::new();
        let metrics = Metrics::new();
        reconcile(&orch, &[(&"db".to_string(), &db)], "stack", &retry, &mut mismatch, &FixedClock(0), &metrics).await;
        assert!(orch.force_updates.lock().unwrap().is_empty());
    }

    #[test]
    fn mismatch_tracker_clears_on_colocation() {
        let mut tracker = MismatchTracker::new();
        let first = tracker.observe("web", 10);
        assert_eq!(first, 10);
        tracker.clear("web");
        let restarted = tracker.observe("web", 20);
        assert_eq!(restarted, 20);
    }
}
