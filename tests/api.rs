//! API endpoint integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;
use voicebridge::Config;
use voicebridge::api::{ApiServer, ApiState};
use voicebridge::config::file::VoicebridgeConfigFile;

mod common;
use common::Fakes;

/// Build a test API router backed by fake collaborators
fn build_test_router() -> axum::Router {
    let config = Config::from_sources(VoicebridgeConfigFile::default(), |key| match key {
        "VOICEBRIDGE_LLM_MODEL" => Some("test-model".to_string()),
        "VOICEBRIDGE_WORKER_POOL_SIZE" => Some("7".to_string()),
        _ => None,
    })
    .unwrap();
    let state = ApiState::new(&config, Fakes::new().collaborators());
    ApiServer::with_state(state, "127.0.0.1:0").router()
}

async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
    let response = build_test_router()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or_default())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, json) = get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_endpoint() {
    let (status, json) = get_json("/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connections"], 0);
    assert_eq!(json["model"], "test-model");
    assert_eq!(json["quiet_interval_ms"], 1000);
    assert_eq!(json["worker_pool_size"], 7);
    assert_eq!(json["workers_available"], 7);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let (status, _) = get_json("/ws").await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn test_unknown_route() {
    let (status, _) = get_json("/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
