//! Scheduler / Leader Gate: runs C3+C4 and C5 concurrently on independent
//! periods, only on the elected manager. Generalizes the teacher's
//! `tokio::select!`-races-a-cancellation-token-against-an-interval shape
//! from a single poll loop to three reconciliation loops sharing one token.

use crate::config::ConfigStore;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::reconcile;
use crate::reconcile::dependents::MismatchTracker;
use crate::reconcile::rebalance::RebalanceStateStore;
use crate::retry::{RetryState, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Scheduler {
    pub orchestrator: Arc<dyn Orchestrator + Send + Sync>,
    pub config: Arc<ConfigStore>,
    pub stack_name: String,
    pub retry: Arc<RetryState>,
    pub rebalance_state: Arc<RebalanceStateStore>,
    pub metrics: Arc<Metrics>,
    pub http_client: reqwest::Client,
}

impl Scheduler {
    /// Spawns the anchor/dependent loop (period `relabel_seconds`, also
    /// drained by `sync_rx` for out-of-band triggers from `/sync` and
    /// `SIGHUP`) and the rebalance loop (period `rebalance_seconds`).
    pub fn spawn(
        self: Arc<Self>,
        relabel_seconds: u64,
        rebalance_seconds: u64,
        cancel: CancellationToken,
        mut sync_rx: mpsc::Receiver<()>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let anchor_dependent = {
            let scheduler = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(relabel_seconds.max(1)));
                let mut mismatch = MismatchTracker::new();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                        _ = sync_rx.recv() => {}
                    }
                    scheduler.run_anchor_and_dependent_pass(&mut mismatch).await;
                }
            })
        };

        let rebalance = {
            let scheduler = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(rebalance_seconds.max(1)));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    scheduler.run_rebalance_pass().await;
                }
            })
        };

        vec![anchor_dependent, rebalance]
    }

    async fn am_leader(&self) -> bool {
        match self.orchestrator.am_leader().await {
            Ok(leader) => {
                self.metrics.swarm_orch_leader.set(if leader { 1.0 } else { 0.0 });
                leader
            }
            Err(e) => {
                warn!(error = %e, "failed to determine leadership, skipping pass");
                false
            }
        }
    }

    async fn run_anchor_and_dependent_pass(&self, mismatch: &mut MismatchTracker) {
        if !self.am_leader().await {
            debug!("not leader, skipping anchor/dependent pass");
            return;
        }
        let anchors = self.config.anchors();
        let clock = SystemClock;
        reconcile::anchor_and_dependent_pass(
            self.orchestrator.as_ref(),
            &anchors,
            &self.stack_name,
            &self.retry,
            mismatch,
            &clock,
            &self.metrics,
        )
        .await;
    }

    async fn run_rebalance_pass(&self) {
        if !self.am_leader().await {
            debug!("not leader, skipping rebalance pass");
            return;
        }
        let anchors = self.config.anchors();
        let rebalance_cfg = self.config.rebalance();
        let clock = SystemClock;
        let started = std::time::Instant::now();
        reconcile::rebalance::reconcile(
            self.orchestrator.as_ref(),
            &anchors,
            &self.stack_name,
            &rebalance_cfg,
            &self.rebalance_state,
            &self.http_client,
            &clock,
            &self.metrics,
        )
        .await;
        self.metrics.rebalance_last_duration_seconds.set(started.elapsed().as_secs_f64());
    }
}
