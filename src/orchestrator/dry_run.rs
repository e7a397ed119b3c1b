//! Dry-run decorator (spec.md §6, `DRY_RUN`): wraps any [`Orchestrator`]
//! and turns every mutating call into a logged no-op while leaving reads
//! untouched, so a full pass can be observed without touching the cluster.

use crate::orchestrator::{NodeInfo, Orchestrator, OrchestratorResult, ServiceSpec, Task};
use async_trait::async_trait;
use tracing::info;

pub struct DryRunOrchestrator<O> {
    inner: O,
}

impl<O> DryRunOrchestrator<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Orchestrator> Orchestrator for DryRunOrchestrator<O> {
    async fn list_nodes(&self) -> OrchestratorResult<Vec<NodeInfo>> {
        self.inner.list_nodes().await
    }

    async fn inspect_service(&self, full_name: &str) -> OrchestratorResult<ServiceSpec> {
        self.inner.inspect_service(full_name).await
    }

    async fn list_tasks(&self, full_name: &str) -> OrchestratorResult<Vec<Task>> {
        self.inner.list_tasks(full_name).await
    }

    async fn force_update(&self, full_name: &str) -> OrchestratorResult<()> {
        info!(service = full_name, "dry_run: would force-update");
        Ok(())
    }

    async fn add_label(&self, node_id: &str, key: &str, value: &str) -> OrchestratorResult<()> {
        info!(node_id, key, value, "dry_run: would add node label");
        Ok(())
    }

    async fn remove_label(&self, node_id: &str, key: &str) -> OrchestratorResult<()> {
        info!(node_id, key, "dry_run: would remove node label");
        Ok(())
    }

    async fn node_memory_bytes(&self, node_id: &str) -> OrchestratorResult<u64> {
        self.inner.node_memory_bytes(node_id).await
    }

    async fn am_leader(&self) -> OrchestratorResult<bool> {
        self.inner.am_leader().await
    }

    async fn service_memory_usage_bytes(&self, full_name: &str) -> OrchestratorResult<u64> {
        self.inner.service_memory_usage_bytes(full_name).await
    }
}
