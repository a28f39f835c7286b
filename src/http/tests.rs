use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::util::ServiceExt;

use crate::{
    engine::{EngineOptions, KvEngine},
    http::{AppState, build_api_router},
    membership::MembershipController,
    raft::app::{LocalConsensus, NodeState},
    router::CommandRouter,
};

fn app_with(tmp: &TempDir) -> (axum::Router, Arc<LocalConsensus>) {
    let engine = KvEngine::open(EngineOptions {
        dir: tmp.path().to_path_buf(),
        create_if_missing: true,
    })
    .unwrap();
    let consensus = Arc::new(LocalConsensus::new(engine.clone()));
    let router = Arc::new(CommandRouter::new(
        consensus.clone(),
        engine,
        Duration::from_millis(500),
    ));
    let membership = Arc::new(MembershipController::new(consensus.clone()));

    let app = build_api_router(AppState {
        router,
        membership,
        consensus: consensus.clone(),
    });
    (app, consensus)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn get_missing_key_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .oneshot(empty_request("GET", "/api/v1/kv/missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "key not found"}));
}

#[tokio::test]
async fn put_get_delete_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/api/v1/kv/city", json!({"name": "Oslo"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/v1/kv/city"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"key": "city", "value": {"name": "Oslo"}})
    );

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/api/v1/kv/city"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(empty_request("GET", "/api/v1/kv/city"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn write_on_follower_maps_to_service_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, consensus) = app_with(&tmp);
    consensus.set_state(NodeState::Follower);

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/api/v1/kv/k", json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await, json!({"error": "not the leader"}));

    let response = app
        .oneshot(empty_request("DELETE", "/api/v1/kv/k"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn whitespace_key_is_a_client_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .oneshot(json_request("PUT", "/api/v1/kv/%20%20", json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "key is empty"}));
}

#[tokio::test]
async fn invalid_body_is_a_client_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let request = Request::builder()
        .method("PUT")
        .uri("/api/v1/kv/k")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "invalid request body"})
    );
}

#[tokio::test]
async fn stat_reports_the_replica_state() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .oneshot(empty_request("GET", "/api/v1/raft/stat"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], json!("Leader"));
}

#[tokio::test]
async fn join_on_follower_is_service_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, consensus) = app_with(&tmp);
    consensus.set_state(NodeState::Follower);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/raft/join",
            json!({"NodeID": 2, "RaftAddress": "http://127.0.0.1:7081"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn drop_of_unknown_node_is_a_client_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .oneshot(json_request("POST", "/api/v1/raft/drop", json!({"NodeID": 42})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_succeeds_on_the_leader() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _consensus) = app_with(&tmp);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/raft/join",
            json!({"NodeID": 2, "RaftAddress": "http://127.0.0.1:7081"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"success": true}));
}
