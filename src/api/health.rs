//! Health and status endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Relay status summary
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub connections: usize,
    pub model: String,
    pub quiet_interval_ms: u64,
    pub worker_pool_size: usize,
    pub workers_available: usize,
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len().await,
        model: state.llm_model.clone(),
        quiet_interval_ms: u64::try_from(state.settings.policy.quiet_interval.as_millis())
            .unwrap_or(u64::MAX),
        worker_pool_size: state.pool.size(),
        workers_available: state.pool.available(),
    })
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}
