//! Signal handling (C7, spec.md §6): `SIGHUP` triggers one immediate
//! anchor/dependent pass; `SIGTERM`/`SIGINT` flip the shared cancellation
//! token for graceful shutdown.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Listens for process signals until `cancel` fires (e.g. from another
/// signal arm or the HTTP surface). `sync_trigger` is the same channel
/// `/sync` uses, so SIGHUP never races a scheduled pass.
pub async fn handle_signals(cancel: CancellationToken, sync_trigger: tokio::sync::mpsc::Sender<()>) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut hup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                cancel.cancel();
                break;
            }
            _ = term.recv() => {
                info!("received SIGTERM, shutting down");
                cancel.cancel();
                break;
            }
            _ = hup.recv() => {
                info!("received SIGHUP, triggering immediate sync");
                let _ = sync_trigger.try_send(());
            }
        }
    }
}
