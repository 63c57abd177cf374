//! HTTP status endpoint
//!
//! - `GET /health`: run state and queue counts
//! - `GET /status`: per-worker status feed as JSON
//! - `GET /metrics`: Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use dispatch_pool::{CancellationToken, ExhaustionTracker, JobQueue, StatusFeed};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for the status handlers.
#[derive(Clone)]
pub struct StatusState {
    pub feed: Arc<StatusFeed>,
    pub queue: Arc<JobQueue>,
    pub tracker: Arc<ExhaustionTracker>,
    pub prometheus: PrometheusHandle,
    pub run_id: String,
    pub total_jobs: usize,
    pub started_at: Instant,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until `stop` fires.
pub async fn serve(addr: SocketAddr, state: StatusState, stop: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status endpoint to {addr}"))?;
    info!(addr = %addr, "status endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
        .context("status endpoint failed")
}

async fn health_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let drained = state.queue.is_drained().await;
    let body = serde_json::json!({
        "status": if drained { "drained" } else { "running" },
        "run_id": state.run_id,
        "total_jobs": state.total_jobs,
        "pending": state.queue.size().await,
        "in_flight": state.queue.in_flight().await,
        "completed": state.feed.total_completed().await,
        "high_tier_exhausted": state.tracker.all_high_tier_exhausted(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn status_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let exhausted: Vec<String> = state
        .tracker
        .exhausted()
        .iter()
        .map(ToString::to_string)
        .collect();
    let body = serde_json::json!({
        "workers": state.feed.snapshot().await,
        "pending": state.queue.pending_ids().await,
        "exhausted": exhausted,
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn metrics_handler(State(state): State<StatusState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
