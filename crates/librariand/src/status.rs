//! HTTP status endpoint for librariand
//!
//! Read-only view of the service for operators: liveness and session
//! counters. Think sessions never go through here.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::server::{LibrarianService, StatsSnapshot};

type ServiceArc = Arc<LibrarianService>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub started_at: String,
    pub sessions: StatsSnapshot,
    pub max_sessions: usize,
    pub default_max_loops: i32,
    pub default_max_results: i32,
    pub timeout_ms: u64,
}

pub fn status_routes() -> Router<ServiceArc> {
    Router::new()
        .route("/v1/health", get(health_check))
        .route("/v1/status", get(status))
}

pub fn app(service: ServiceArc) -> Router {
    status_routes()
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(service): State<ServiceArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: service.start_time.elapsed().as_secs(),
    })
}

async fn status(State(service): State<ServiceArc>) -> Json<StatusResponse> {
    let limits = service.machine.defaults();
    Json(StatusResponse {
        started_at: service.started_at.to_rfc3339(),
        sessions: service.stats.snapshot(),
        max_sessions: service.config.max_sessions,
        default_max_loops: limits.max_loops,
        default_max_results: limits.max_results,
        timeout_ms: service.config.timeout_ms,
    })
}

/// Serve the status routes until `shutdown` resolves.
pub async fn serve_status<F>(listener: TcpListener, service: ServiceArc, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Status endpoint on http://{}", addr);
    }
    axum::serve(listener, app(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
