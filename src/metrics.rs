//! Prometheus registry and counters for the HTTP `/metrics` surface (C6).
//!
//! Named after spec.md §6's minimum set. Built on the `prometheus` crate the
//! same way the teacher's metrics server registers and encodes counters.

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub anchor_updates_total: IntCounter,
    pub dependent_updates_total: IntCounter,
    pub anchor_sync_errors_total: IntCounter,
    pub anchor_sync_last_duration_seconds: Gauge,
    pub rebalance_attempts_total: IntCounter,
    pub rebalance_success_total: IntCounter,
    pub rebalance_failures_total: IntCounter,
    pub rebalance_last_duration_seconds: Gauge,
    pub swarm_orch_leader: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let anchor_updates_total =
            IntCounter::new("anchor_updates_total", "node labels added or removed by the anchor loop").unwrap();
        let dependent_updates_total =
            IntCounter::new("dependent_updates_total", "force-updates issued by the dependent placement loop").unwrap();
        let anchor_sync_errors_total =
            IntCounter::new("anchor_sync_errors_total", "errors encountered during an anchor/dependent pass").unwrap();
        let anchor_sync_last_duration_seconds = Gauge::new(
            "anchor_sync_last_duration_seconds",
            "wall-clock duration of the most recent anchor/dependent pass",
        )
        .unwrap();
        let rebalance_attempts_total =
            IntCounter::new("rebalance_attempts_total", "rebalance moves attempted").unwrap();
        let rebalance_success_total =
            IntCounter::new("rebalance_success_total", "rebalance moves that succeeded").unwrap();
        let rebalance_failures_total =
            IntCounter::new("rebalance_failures_total", "rebalance moves that failed").unwrap();
        let rebalance_last_duration_seconds = Gauge::new(
            "rebalance_last_duration_seconds",
            "wall-clock duration of the most recent rebalance pass",
        )
        .unwrap();
        let swarm_orch_leader = Gauge::new("swarm_orch_leader", "1 if this instance is the swarm manager leader").unwrap();

        registry.register(Box::new(anchor_updates_total.clone())).unwrap();
        registry.register(Box::new(dependent_updates_total.clone())).unwrap();
        registry.register(Box::new(anchor_sync_errors_total.clone())).unwrap();
        registry.register(Box::new(anchor_sync_last_duration_seconds.clone())).unwrap();
        registry.register(Box::new(rebalance_attempts_total.clone())).unwrap();
        registry.register(Box::new(rebalance_success_total.clone())).unwrap();
        registry.register(Box::new(rebalance_failures_total.clone())).unwrap();
        registry.register(Box::new(rebalance_last_duration_seconds.clone())).unwrap();
        registry.register(Box::new(swarm_orch_leader.clone())).unwrap();

        Self {
            registry,
            anchor_updates_total,
            dependent_updates_total,
            anchor_sync_errors_total,
            anchor_sync_last_duration_seconds,
            rebalance_attempts_total,
            rebalance_success_total,
            rebalance_failures_total,
            rebalance_last_duration_seconds,
            swarm_orch_leader,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).unwrap_or_default();
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
