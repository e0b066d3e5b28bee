// SPDX-License-Identifier: PMPL-1.0-or-later
//! HTTP surface end to end: auth, direct dispatch, deferred dispatch.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use docrelay_api::{build_router, ApiKeyAuthenticator, AppState};
use docrelay_broker::{Dispatcher, InMemoryQueue, IntakeConfig, IntakeLoop};
use docrelay_cache::{InMemoryCache, ResultCache};
use docrelay_store::{Document, DocumentStore, InMemoryDriver, StoreConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

struct Service {
    store: DocumentStore,
    intake: IntakeLoop,
    app: Router,
}

fn service() -> Service {
    let store = DocumentStore::new(Arc::new(InMemoryDriver::new()), StoreConfig::default());
    let dispatcher = Arc::new(Dispatcher::new(store.clone()));
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30)));
    let results = ResultCache::new(Arc::new(InMemoryCache::new()), Duration::from_secs(300));
    let intake = IntakeLoop::new(
        queue.clone(),
        dispatcher.clone(),
        results.clone(),
        IntakeConfig {
            wait_time: Duration::ZERO,
            ..IntakeConfig::default()
        },
    );
    let state = AppState::new(dispatcher, queue, results)
        .with_authenticator(Arc::new(ApiKeyAuthenticator::with_keys([("tests", "let-me-in")])));
    Service {
        store,
        intake,
        app: build_router(state),
    }
}

fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn denied_requests_never_reach_the_store() {
    let svc = service();
    let insert = json!({"action": "setNew", "payload": {"dbName": "app", "collection": "c", "data": {"x": 1}}});

    let missing = svc
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/actions", None, Some(insert.clone())))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(missing).await["code"], 401);

    let wrong = svc
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/actions", Some("nope"), Some(insert)))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(wrong).await["error"], "Invalid API key");

    assert!(svc.store.list_collections("app").await.unwrap().is_empty());
    let found = svc.store.get("app", "c", Document::new(), Document::new()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn health_is_public() {
    let svc = service();
    let response = svc.app.oneshot(request("GET", "/health", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn direct_action_with_key_succeeds() {
    let svc = service();
    let response = svc
        .app
        .oneshot(request(
            "POST",
            "/api/v1/actions",
            Some("let-me-in"),
            Some(json!({"action": "setNew", "collection": "c", "payload": {"dbName": "app", "data": {"x": 1}}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["x"], 1);
    assert!(svc.store.get("app", "c", Document::new(), Document::new()).await.unwrap().is_some());
}

#[tokio::test]
async fn deferred_request_is_answered_through_the_result_cache() {
    let svc = service();
    let accepted = svc
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/requests",
            Some("let-me-in"),
            Some(json!({
                "action": "setNew",
                "payload": {"dbName": "app", "collection": "c", "data": {"x": 7}},
                "correlationId": "corr-1",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(accepted).await, json!({"correlationId": "corr-1"}));

    let pending = svc
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/responses/corr-1", Some("let-me-in"), None))
        .await
        .unwrap();
    assert_eq!(pending.status(), StatusCode::NOT_FOUND);

    let report = svc.intake.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let done = svc
        .app
        .oneshot(request("GET", "/api/v1/responses/corr-1", Some("let-me-in"), None))
        .await
        .unwrap();
    assert_eq!(done.status(), StatusCode::OK);
    let result = json_body(done).await;
    assert_eq!(result["status"], "success");
    assert_eq!(result["data"]["x"], 7);
}
