//! HTTP API tests driven through the router with tower's `oneshot`

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use elect_loader::{build_router, AppState};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn app(root: &std::path::Path) -> Router {
    let pool = memory_pool().await;
    let manager = test_manager(pool, root, Arc::new(FailingFetcher));
    build_router(AppState::new(manager))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_module() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "elect-loader");
    assert!(body.get("active_session").is_none());
}

#[tokio::test]
async fn test_start_rejects_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = send(
        &app,
        post_json(
            "/import/start",
            json!({ "kind": "delimited", "path": dir.path().join("absent.csv") }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = send(&app, get(&format!("/import/status/{}", uuid::Uuid::new_v4()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_import_then_browse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ruelect(
        dir.path(),
        "votes.csv",
        &[
            row("Республика Тыва", 1, 10, &["http://files.example/p/17/1/a.jpg"]),
            row("Город Москва", 5, 30, &[]),
        ],
    );
    let app = app(dir.path()).await;

    let (status, started) = send(
        &app,
        post_json(
            "/import/start",
            json!({
                "kind": "delimited",
                "path": path,
                "parameters": { "unknown_region": "create" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = started["session_id"].as_str().unwrap().to_string();

    let mut state = Value::Null;
    for _ in 0..200 {
        let (_, status_body) = send(&app, get(&format!("/import/status/{}", session_id))).await;
        state = status_body["state"].clone();
        if state == "COMPLETED" && status_body["active"] == false {
            assert_eq!(status_body["counters"]["created"], 2);
            assert_eq!(status_body["provider"], "votes.csv");
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, "COMPLETED");

    let (_, regions) = send(&app, get("/regions")).await;
    let regions = regions.as_array().unwrap();
    assert_eq!(regions.len(), 2);
    let tyva = regions
        .iter()
        .find(|r| r["name"] == "Республика Тыва")
        .unwrap();

    let (status, commissions) = send(
        &app,
        get(&format!("/regions/{}/commissions", tyva["id"].as_str().unwrap())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let commission = &commissions.as_array().unwrap()[0];
    assert_eq!(commission["number"], 1);

    let (_, protocols) = send(
        &app,
        get(&format!(
            "/commissions/{}/protocols",
            commission["id"].as_str().unwrap()
        )),
    )
    .await;
    let protocol = &protocols.as_array().unwrap()[0];
    assert_eq!(protocol["summary"][0], 10);
    assert_eq!(protocol["results"].as_array().unwrap().len(), 7);
    assert_eq!(protocol["images"][0]["uri"], "http://files.example/p/17/1/a.jpg");

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/import/cancel/{}", session_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (_, sessions) = send(&app, get("/import/sessions")).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_commissions_of_unknown_region_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, _) = send(
        &app,
        get(&format!("/regions/{}/commissions", uuid::Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
