//! Docker Swarm implementation of [`Orchestrator`], backed by `bollard`.

use crate::orchestrator::{NodeInfo, Orchestrator, OrchestratorError, OrchestratorResult, ServiceSpec, Task, TaskState};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::NodeSpec;
use bollard::query_parameters::{
    InspectServiceOptions, ListNodesOptionsBuilder, ListTasksOptionsBuilder, UpdateNodeOptionsBuilder,
    UpdateServiceOptionsBuilder,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const LABEL_CONFLICT_RETRIES: u32 = 3;
const LABEL_CONFLICT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SwarmOrchestrator {
    docker: Docker,
}

impl SwarmOrchestrator {
    pub fn connect() -> OrchestratorResult<Self> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| OrchestratorError::Permanent(format!("failed to connect to docker socket: {e}")))?;
        Ok(Self { docker })
    }

    fn classify(err: bollard::errors::Error) -> OrchestratorError {
        use bollard::errors::Error as BollardError;
        match &err {
            BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404 => {
                OrchestratorError::NotFound(err.to_string())
            }
            BollardError::DockerResponseServerError { status_code, .. } if *status_code >= 500 => {
                OrchestratorError::Transient(err.to_string())
            }
            BollardError::DockerResponseServerError { status_code, .. } if *status_code == 409 => {
                OrchestratorError::Transient(err.to_string())
            }
            _ => OrchestratorError::Permanent(err.to_string()),
        }
    }

    async fn node_spec_and_version(&self, node_id: &str) -> OrchestratorResult<(NodeSpec, i64)> {
        let node = self
            .docker
            .inspect_node(node_id)
            .await
            .map_err(Self::classify)?;
        let version = node
            .version
            .as_ref()
            .and_then(|v| v.index)
            .ok_or_else(|| OrchestratorError::Transient(format!("node {node_id} missing version index")))?;
        let spec = node.spec.unwrap_or_default();
        Ok((spec, version as i64))
    }

    async fn update_node_labels(
        &self,
        node_id: &str,
        mutate: impl Fn(&mut HashMap<String, String>),
    ) -> OrchestratorResult<()> {
        let mut last_err = None;
        for attempt in 0..LABEL_CONFLICT_RETRIES {
            let (mut spec, version) = self.node_spec_and_version(node_id).await?;
            let mut labels = spec.labels.unwrap_or_default();
            mutate(&mut labels);
            spec.labels = Some(labels);

            let opts = UpdateNodeOptionsBuilder::default().version(version).build();
            match self.docker.update_node(node_id, spec, Some(opts)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let classified = Self::classify(e);
                    if matches!(classified, OrchestratorError::Transient(_)) && attempt + 1 < LABEL_CONFLICT_RETRIES {
                        warn!(node_id, attempt, "node update conflict, retrying");
                        tokio::time::sleep(LABEL_CONFLICT_BACKOFF).await;
                        last_err = Some(classified);
                        continue;
                    }
                    return Err(classified);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| OrchestratorError::Transient("exhausted label update retries".into())))
    }
}

#[async_trait]
impl Orchestrator for SwarmOrchestrator {
    async fn list_nodes(&self) -> OrchestratorResult<Vec<NodeInfo>> {
        let opts = ListNodesOptionsBuilder::default().build();
        let nodes = self.docker.list_nodes(Some(opts)).await.map_err(Self::classify)?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| {
                let id = n.id?;
                let description = n.description.unwrap_or_default();
                let hostname = description.hostname.unwrap_or_default();
                let memory_bytes = description
                    .resources
                    .and_then(|r| r.memory_bytes)
                    .filter(|m| *m >= 0)
                    .map(|m| m as u64)
                    .unwrap_or(0);
                let labels = n.spec.and_then(|s| s.labels).unwrap_or_default();
                Some(NodeInfo { id, hostname, labels, memory_bytes })
            })
            .collect())
    }

    async fn inspect_service(&self, full_name: &str) -> OrchestratorResult<ServiceSpec> {
        let service = self
            .docker
            .inspect_service(full_name, None::<InspectServiceOptions>)
            .await
            .map_err(Self::classify)?;
        let spec = service.spec.unwrap_or_default();
        let digest = service
            .version
            .and_then(|v| v.index)
            .map(|i| i.to_string())
            .unwrap_or_default();
        Ok(ServiceSpec {
            name: spec.name.unwrap_or_else(|| full_name.to_string()),
            labels: spec.labels.unwrap_or_default(),
            task_template_digest: digest,
        })
    }

    async fn list_tasks(&self, full_name: &str) -> OrchestratorResult<Vec<Task>> {
        let filters: HashMap<String, Vec<String>> =
            HashMap::from([("service".to_string(), vec![full_name.to_string()])]);
        let opts = ListTasksOptionsBuilder::default().filters(&filters).build();
        let mut tasks: Vec<Task> = self
            .docker
            .list_tasks(Some(opts))
            .await
            .map_err(Self::classify)?
            .into_iter()
            .filter_map(|t| {
                let status = t.status?;
                let state: TaskState = status.state?.to_string().parse().ok()?;
                let desired_state: TaskState = t.desired_state?.to_string().parse().ok()?;
                let timestamp = status.timestamp.unwrap_or_default();
                Some(Task {
                    state,
                    desired_state,
                    node_id: t.node_id,
                    timestamp,
                    message: status.message,
                })
            })
            .collect();
        tasks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(tasks)
    }

    async fn force_update(&self, full_name: &str) -> OrchestratorResult<()> {
        let service = self
            .docker
            .inspect_service(full_name, None::<InspectServiceOptions>)
            .await
            .map_err(Self::classify)?;
        let spec = service.spec.unwrap_or_default();
        let version = service
            .version
            .and_then(|v| v.index)
            .ok_or_else(|| OrchestratorError::Transient(format!("service {full_name} missing version index")))?;
        let opts = UpdateServiceOptionsBuilder::default().version(version as i32).build();
        // Pass the spec back unchanged: force_update must never touch task-template or placement.
        self.docker
            .update_service(full_name, spec, opts, None)
            .await
            .map_err(Self::classify)?;
        debug!(service = full_name, "forced rolling update");
        Ok(())
    }

    async fn add_label(&self, node_id: &str, key: &str, value: &str) -> OrchestratorResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.update_node_labels(node_id, move |labels| {
            labels.insert(key.clone(), value.clone());
        })
        .await
    }

    async fn remove_label(&self, node_id: &str, key: &str) -> OrchestratorResult<()> {
        let key = key.to_string();
        self.update_node_labels(node_id, move |labels| {
            labels.remove(&key);
        })
        .await
    }

    async fn node_memory_bytes(&self, node_id: &str) -> OrchestratorResult<u64> {
        let node = self.docker.inspect_node(node_id).await.map_err(Self::classify)?;
        Ok(node
            .description
            .and_then(|d| d.resources)
            .and_then(|r| r.memory_bytes)
            .filter(|m| *m >= 0)
            .map(|m| m as u64)
            .unwrap_or(0))
    }

    async fn am_leader(&self) -> OrchestratorResult<bool> {
        let info = self.docker.info().await.map_err(Self::classify)?;
        let swarm = info.swarm.ok_or_else(|| OrchestratorError::Transient("node is not part of a swarm".into()))?;
        Ok(swarm.control_available.unwrap_or(false))
    }

    async fn service_memory_usage_bytes(&self, full_name: &str) -> OrchestratorResult<u64> {
        let filters: HashMap<String, Vec<String>> = HashMap::from([(
            "label".to_string(),
            vec![format!("com.docker.swarm.service.name={full_name}")],
        )]);
        let opts = bollard::query_parameters::ListContainersOptionsBuilder::default()
            .filters(&filters)
            .build();
        let containers = match self.docker.list_containers(Some(opts)).await {
            Ok(c) => c,
            Err(e) => {
                warn!(service = full_name, error = %e, "failed to list containers for memory usage sample");
                return Ok(0);
            }
        };

        let mut total = 0u64;
        for container in containers {
            let Some(id) = container.id else { continue };
            let opts = bollard::query_parameters::StatsOptionsBuilder::default()
                .stream(false)
                .build();
            let mut stream = self.docker.stats(&id, Some(opts));
            use futures::StreamExt;
            if let Some(Ok(stats)) = stream.next().await {
                if let Some(usage) = stats.memory_stats.and_then(|m| m.usage) {
                    total = total.saturating_add(usage);
                }
            }
        }
        Ok(total)
    }
}
