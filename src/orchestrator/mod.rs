//! Typed interface over the Docker-Swarm-compatible cluster API (C1).
//!
//! `Orchestrator` is the only seam through which every reconciliation loop
//! talks to the cluster. Production code uses [`swarm::SwarmOrchestrator`]
//! (backed by `bollard`); tests use an in-memory fake that implements the
//! same trait.

pub mod dry_run;
pub mod swarm;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The adapter's typed error taxonomy (spec §7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("permanent error: {0}")]
    Permanent(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// A single runtime instance of a service, as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub state: TaskState,
    pub desired_state: TaskState,
    pub node_id: Option<String>,
    /// Orchestrator-reported timestamp, used only to sort tasks; opaque to us.
    pub timestamp: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Allocated,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Ready,
    Starting,
    Running,
    Complete,
    Failed,
    Rejected,
    Shutdown,
    Remove,
    Orphaned,
}

impl TaskState {
    pub fn is_ignored(self) -> bool {
        matches!(self, TaskState::New | TaskState::Allocated | TaskState::Pending)
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskState::Assigned
                | TaskState::Accepted
                | TaskState::Preparing
                | TaskState::Ready
                | TaskState::Starting
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Complete)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskState::Failed | TaskState::Rejected | TaskState::Remove | TaskState::Orphaned
        )
    }

    pub fn is_terminal(self) -> bool {
        self.is_success() || self.is_failure() || matches!(self, TaskState::Shutdown)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::New => "new",
            TaskState::Allocated => "allocated",
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Preparing => "preparing",
            TaskState::Ready => "ready",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
            TaskState::Shutdown => "shutdown",
            TaskState::Remove => "remove",
            TaskState::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TaskState {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new" => TaskState::New,
            "allocated" => TaskState::Allocated,
            "pending" => TaskState::Pending,
            "assigned" => TaskState::Assigned,
            "accepted" => TaskState::Accepted,
            "preparing" => TaskState::Preparing,
            "ready" => TaskState::Ready,
            "starting" => TaskState::Starting,
            "running" => TaskState::Running,
            "complete" => TaskState::Complete,
            "failed" => TaskState::Failed,
            "rejected" => TaskState::Rejected,
            "shutdown" => TaskState::Shutdown,
            "remove" => TaskState::Remove,
            "orphaned" => TaskState::Orphaned,
            other => return Err(OrchestratorError::Permanent(format!("unknown task state: {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: String,
    pub hostname: String,
    pub labels: HashMap<String, String>,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Opaque digest of the task template, used only to detect drift; never compared for placement.
    pub task_template_digest: String,
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_nodes(&self) -> OrchestratorResult<Vec<NodeInfo>>;

    async fn inspect_service(&self, full_name: &str) -> OrchestratorResult<ServiceSpec>;

    /// Tasks for a service, sorted by timestamp descending (most recent first).
    async fn list_tasks(&self, full_name: &str) -> OrchestratorResult<Vec<Task>>;

    /// Trigger a rolling update equivalent to `service update --force`.
    /// Must preserve the existing spec: never touch task-template or placement.
    async fn force_update(&self, full_name: &str) -> OrchestratorResult<()>;

    async fn add_label(&self, node_id: &str, key: &str, value: &str) -> OrchestratorResult<()>;

    async fn remove_label(&self, node_id: &str, key: &str) -> OrchestratorResult<()>;

    async fn node_memory_bytes(&self, node_id: &str) -> OrchestratorResult<u64>;

    async fn am_leader(&self) -> OrchestratorResult<bool>;

    /// Best-effort current memory usage of a service's containers, summed
    /// across its tasks. Used only as a safety bound by the rebalance loop
    /// (C5); a service with no usage sample contributes 0.
    async fn service_memory_usage_bytes(&self, _full_name: &str) -> OrchestratorResult<u64> {
        Ok(0)
    }

    /// Most recent task's state/node, used for failover decisions (C3/C4).
    /// Unlike [`Orchestrator::anchor_label_location`], accepts any task state.
    async fn anchor_location(&self, full_name: &str) -> OrchestratorResult<(TaskState, Option<String>)> {
        let tasks = self.list_tasks(full_name).await?;
        match tasks.first() {
            Some(task) => Ok((task.state, task.node_id.clone())),
            None => Err(OrchestratorError::NotFound(full_name.to_string())),
        }
    }

    /// Node id only if a task exists with `state = running && desired_state = running`.
    /// Used for labelling (C3) — stricter than [`Orchestrator::anchor_location`] to
    /// avoid labelling a node that hosts only a failing task.
    async fn anchor_label_location(&self, full_name: &str) -> OrchestratorResult<Option<String>> {
        let tasks = self.list_tasks(full_name).await?;
        Ok(tasks
            .into_iter()
            .find(|t| t.state == TaskState::Running && t.desired_state == TaskState::Running)
            .and_then(|t| t.node_id))
    }
}
