//! HTTP routes driven through the router without a listener.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{Harness, OWNER, StubFetcher};
use live_relay::api::{ApiServer, ApiServerConfig};

fn router(harness: &Harness) -> Router {
    ApiServer::new(ApiServerConfig::default(), harness.container.app_state()).build_router()
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn stream_body(name: &str) -> Value {
    json!({
        "owner_id": OWNER,
        "name": name,
        "source": "https://drive.google.com/open?id=1AbC-dEf_123",
        "key": "abcd-1234-efgh-5678",
        "loop": true,
        "is_scheduled": false,
        "is_end_scheduled": false
    })
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    let router = router(&harness);

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_create_and_list_streams() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    harness.subscribe("LIVE1").await;
    let router = router(&harness);

    let (status, created) =
        send(&router, Method::POST, "/api/streams", Some(stream_body("Morning"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = send(
        &router,
        Method::GET,
        &format!("/api/owners/{OWNER}/streams"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["active_count"], 0);
    let streams = listed["streams"].as_array().unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0]["id"], id.as_str());
    assert_eq!(streams[0]["stream_key_partial"], "abcd...");
    assert!(!listed.to_string().contains("abcd-1234-efgh-5678"));
}

#[tokio::test]
async fn test_quota_exceeded_is_forbidden() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    harness.subscribe("LIVE1").await;
    let router = router(&harness);

    let (status, _) = send(&router, Method::POST, "/api/streams", Some(stream_body("a"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, Method::POST, "/api/streams", Some(stream_body("b"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "QUOTA_EXCEEDED");
    assert_eq!(body["details"]["limit"], 1);
}

#[tokio::test]
async fn test_invalid_request_is_unprocessable() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    harness.subscribe("LIVE1").await;
    let router = router(&harness);

    let mut body = stream_body("  ");
    body["name"] = json!("");
    let (status, body) = send(&router, Method::POST, "/api/streams", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_start_now_rename_and_delete() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    harness.subscribe("LIVE1").await;
    let router = router(&harness);

    let mut body = stream_body("Evening");
    body["is_scheduled"] = json!(true);
    body["start_time"] = json!((chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339());
    let (status, created) = send(&router, Method::POST, "/api/streams", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "scheduled");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, promoted) = send(
        &router,
        Method::POST,
        &format!("/api/streams/{id}/start-now"),
        Some(json!({ "owner_id": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(promoted["status"], "pending");
    assert!(promoted["scheduled_at"].is_null());

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/streams/{id}/start-now"),
        Some(json!({ "owner_id": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, renamed) = send(
        &router,
        Method::PUT,
        &format!("/api/streams/{id}"),
        Some(json!({ "owner_id": OWNER, "name": "Late show" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Late show");

    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/streams/{id}?owner_id=someone-else"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, deleted) = send(
        &router,
        Method::DELETE,
        &format!("/api/streams/{id}?owner_id={OWNER}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);
}

#[tokio::test]
async fn test_stop_unknown_stream_is_not_found() {
    let harness = Harness::build("exit 0", StubFetcher::new(), |_| {}).await;
    let router = router(&harness);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/streams/missing/stop",
        Some(json!({ "owner_id": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
