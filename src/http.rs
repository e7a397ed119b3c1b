//! HTTP admin/metrics surface (C6, spec.md §6). Built on `axum`, matching
//! the teacher's own metrics-server stack exactly.

use crate::metrics::Metrics;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    sync_tx: mpsc::Sender<()>,
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn sync(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state.sync_tx.try_send(());
    Json(json!({"status": "triggered"}))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.encode()
}

fn router(metrics: Arc<Metrics>, sync_tx: mpsc::Sender<()>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync", post(sync))
        .route("/metrics", get(metrics))
        .with_state(AppState { metrics, sync_tx })
}

pub async fn serve(port: u16, metrics: Arc<Metrics>, sync_tx: mpsc::Sender<()>, cancel: CancellationToken) {
    let app = router(metrics, sync_tx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, %addr, "failed to bind HTTP surface");
            return;
        }
    };
    info!(%addr, "HTTP surface listening");
    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        warn!(error = %e, "HTTP surface terminated unexpectedly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (tx, _rx) = mpsc::channel(1);
        let app = router(Arc::new(Metrics::new()), tx);
        let response = axum::http::Request::builder()
            .uri("/healthz")
            .body(axum::body::Body::empty())
            .unwrap();
        use tower::ServiceExt;
        let response = app.oneshot(response).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_sends_trigger() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = router(Arc::new(Metrics::new()), tx);
        let response = axum::http::Request::builder()
            .method("POST")
            .uri("/sync")
            .body(axum::body::Body::empty())
            .unwrap();
        use tower::ServiceExt;
        let response = app.oneshot(response).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert!(rx.try_recv().is_ok());
    }
}
