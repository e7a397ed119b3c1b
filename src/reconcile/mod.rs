//! Reconciliation loops: C3 (anchor labels), C4 (dependent placement) and
//! C5 (memory rebalance). `anchor_and_dependent_pass` is the unit both the
//! scheduler and the `/sync` HTTP endpoint trigger, since the spec requires
//! a manual sync never race a scheduled one.

pub mod anchor_labels;
pub mod dependents;
pub mod rebalance;

use crate::config::anchors::AnchorsMap;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::retry::{Clock, RetryState};
use dependents::MismatchTracker;
use std::time::Instant;
use tracing::error;

/// One pass of C3 followed by C4, in anchor configuration order.
pub async fn anchor_and_dependent_pass(
    orchestrator: &(dyn Orchestrator + Send + Sync),
    anchors: &AnchorsMap,
    stack_name: &str,
    retry: &RetryState,
    mismatch: &mut MismatchTracker,
    clock: &dyn Clock,
    metrics: &Metrics,
) {
    let started = Instant::now();

    if let Err(e) = anchor_labels::reconcile(orchestrator, anchors, stack_name, metrics).await {
        error!(error = %e, "anchor label pass aborted early");
        metrics.anchor_sync_errors_total.inc();
    }

    let mut ordered: Vec<(&String, &crate::config::anchors::AnchorConfig)> = anchors.iter().collect();
    ordered.sort_by_key(|(name, _)| name.as_str());
    dependents::reconcile(orchestrator, &ordered, stack_name, retry, mismatch, clock, metrics).await;

    metrics.anchor_sync_last_duration_seconds.set(started.elapsed().as_secs_f64());
}
