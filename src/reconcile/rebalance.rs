//! Memory Rebalance Loop (C5, spec.md §4.5).
//!
//! Moves a service off its current node when a strictly better node exists,
//! the imbalance has persisted for a configured window, and the move would
//! net-improve the spread by at least `rebalance_buffer_gb`. A service's
//! siblings are its anchor's configured dependents (the set that would
//! migrate alongside it), matching the original's `group_mem` budgeting.

use crate::config::anchors::AnchorsMap;
use crate::config::rebalance::RebalanceConfig;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::retry::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, warn};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebalanceState {
    pub first_detected: Option<i64>,
    pub last_moved: Option<i64>,
    pub moved_to: Option<String>,
}

/// Owns the persisted rebalance-state file exclusively; no other loop
/// writes to it.
pub struct RebalanceStateStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, RebalanceState>>,
}

impl RebalanceStateStore {
    pub fn load(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "rebalance state file is corrupt, starting fresh");
                    None
                }
            })
            .unwrap_or_default();
        Self { path, entries: Mutex::new(entries) }
    }

    fn with_state<R>(&self, service: &str, f: impl FnOnce(&mut RebalanceState) -> R) -> R {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(service.to_string()).or_default();
        let result = f(entry);
        drop(entries);
        self.persist();
        result
    }

    fn persist(&self) {
        let entries = self.entries.lock().unwrap();
        let Ok(serialized) = serde_json::to_vec_pretty(&*entries) else { return };
        drop(entries);
        let Some(dir) = self.path.parent() else { return };
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
        let tmp = self.path.with_extension("tmp");
        if std::fs::write(&tmp, &serialized).is_err() {
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, path = %self.path.display(), "failed to persist rebalance state");
        }
    }
}

fn full_name(stack: &str, short: &str) -> String {
    format!("{stack}_{short}")
}

/// Parses the subset of Prometheus node-exporter text format this loop
/// needs: `node_memory_MemTotal_bytes` / `node_memory_MemAvailable_bytes`.
fn parse_mem_available_bytes(body: &str) -> Option<f64> {
    body.lines()
        .find(|line| line.starts_with("node_memory_MemAvailable_bytes"))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v.max(0.0))
}

/// Free memory per node id, in GiB. Scrapes each node's exporter URL when
/// configured; falls back to the orchestrator-reported capacity otherwise.
async fn collect_free_memory_gib(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    client: &reqwest::Client,
    node_exporters: &HashMap<String, String>,
) -> HashMap<String, f64> {
    let mut result = HashMap::new();
    let Ok(nodes) = orchestrator.list_nodes().await else {
        return result;
    };
    for node in nodes {
        let scraped = match node_exporters.get(&node.hostname) {
            Some(url) => match client.get(url).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => parse_mem_available_bytes(&body),
                    Err(_) => None,
                },
                Err(_) => None,
            },
            None => None,
        };
        let free_bytes = scraped.unwrap_or(node.memory_bytes as f64);
        result.insert(node.id.clone(), free_bytes.max(0.0) / BYTES_PER_GIB);
    }
    result
}

/// Applies steps 1–8 of the decision algorithm and returns a move target if
/// one should be attempted this pass. Mutates `state.first_detected`
/// in-place per steps 5–6; `last_moved`/`moved_to` are the caller's
/// responsibility once the move actually succeeds.
fn decide(
    now: i64,
    service: &str,
    current_node: &str,
    labels: &HashMap<String, String>,
    free_mem_gib: &HashMap<String, f64>,
    group_mem_gib: f64,
    cfg: &RebalanceConfig,
    state: &mut RebalanceState,
) -> Option<String> {
    if labels.get("orchestration.rebalance").map(String::as_str) == Some("false") {
        return None;
    }

    let current_free = *free_mem_gib.get(current_node)?;

    if let Some(preferred) = labels.get("orchestration.preferred.node") {
        if preferred != current_node {
            if let Some(&preferred_free) = free_mem_gib.get(preferred.as_str()) {
                let improvement = (preferred_free - group_mem_gib) - (current_free + group_mem_gib);
                if improvement >= cfg.default.rebalance_buffer_gb {
                    return Some(preferred.clone());
                }
            }
        }
    }

    let memory_difference_gb = cfg.memory_difference_gb(service);
    let better_exists = free_mem_gib
        .iter()
        .any(|(node, &free)| node.as_str() != current_node && free - current_free >= memory_difference_gb);

    if !better_exists {
        *state = RebalanceState::default();
        return None;
    }

    let max_free = free_mem_gib.values().cloned().fold(f64::MIN, f64::max);
    let min_free = free_mem_gib.values().cloned().fold(f64::MAX, f64::min);
    if group_mem_gib >= max_free - min_free {
        return None;
    }

    match state.first_detected {
        None => {
            state.first_detected = Some(now);
            return None;
        }
        Some(first) => {
            let sustained_seconds = cfg.sustained_high_minutes(service) as i64 * 60;
            if now - first < sustained_seconds {
                return None;
            }
        }
    }

    if let Some(last_moved) = state.last_moved {
        let cooldown_seconds = cfg.cooldown_minutes(service) as i64 * 60;
        if now - last_moved < cooldown_seconds {
            return None;
        }
    }

    let (target, &target_free) = free_mem_gib.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    let net_improvement = (target_free - group_mem_gib) - (current_free + group_mem_gib);
    if net_improvement < cfg.default.rebalance_buffer_gb {
        return None;
    }

    Some(target.clone())
}

/// Run one pass of the memory rebalance loop over every configured anchor
/// service (an anchor's dependents are its migration siblings for the
/// purposes of `group_mem`).
pub async fn reconcile(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    anchors: &AnchorsMap,
    stack_name: &str,
    cfg: &RebalanceConfig,
    state_store: &RebalanceStateStore,
    client: &reqwest::Client,
    clock: &dyn Clock,
    metrics: &Metrics,
) {
    let now = clock.now_unix();
    let free_mem_gib = collect_free_memory_gib(orchestrator, client, &cfg.node_exporters).await;

    let mut services: Vec<&String> = anchors.keys().collect();
    services.sort();

    for service in services {
        let anchor = &anchors[service];
        let full = full_name(stack_name, service);

        let current_node = match orchestrator.anchor_location(&full).await {
            Ok((_, Some(node_id))) => node_id,
            Ok((_, None)) => continue,
            Err(crate::orchestrator::OrchestratorError::NotFound(_)) => continue,
            Err(e) => {
                warn!(service, error = %e, "failed to observe service location for rebalance");
                continue;
            }
        };

        let labels = match orchestrator.inspect_service(&full).await {
            Ok(spec) => spec.labels,
            Err(e) => {
                warn!(service, error = %e, "failed to inspect service for rebalance labels");
                continue;
            }
        };

        let mut group_mem_bytes = orchestrator.service_memory_usage_bytes(&full).await.unwrap_or(0) as f64;
        for dependent in &anchor.dependents {
            let dep_full = full_name(stack_name, dependent);
            group_mem_bytes += orchestrator.service_memory_usage_bytes(&dep_full).await.unwrap_or(0) as f64;
        }
        let group_mem_gib = group_mem_bytes / BYTES_PER_GIB;

        let target = state_store.with_state(service, |state| {
            decide(now, service, &current_node, &labels, &free_mem_gib, group_mem_gib, cfg, state)
        });

        let Some(target) = target else { continue };

        metrics.rebalance_attempts_total.inc();
        match orchestrator.force_update(&full).await {
            Ok(()) => {
                metrics.rebalance_success_total.inc();
                state_store.with_state(service, |state| {
                    state.last_moved = Some(now);
                    state.moved_to = Some(target.clone());
                });
            }
            Err(e) => {
                metrics.rebalance_failures_total.inc();
                error!(service, target, error = %e, "force_update failed for rebalance move");
            }
        }
    }
}
