// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! DocRelay API
//!
//! HTTP surface for DocRelay. Actions can be run directly and answered in
//! the response, or enqueued for the intake loop and collected later from
//! the result cache by correlation id.
//!
//! Routes:
//! - `GET /health`, `GET /ready`
//! - `POST /api/v1/actions`
//! - `POST /api/v1/requests`
//! - `GET /api/v1/responses/{correlation_id}`

pub mod auth;
pub mod config;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use docrelay_broker::{Dispatcher, Envelope, MessageQueue, OperationRequest, QueueError};
use docrelay_cache::{CacheError, OperationResult, ResultCache};
use docrelay_store::{Document, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use auth::{ApiKeyAuthenticator, AuthDecision, Authenticator, OpenAuthenticator};
pub use config::ServiceConfig;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Queue(_) | ApiError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Body of `POST /api/v1/actions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Merged into the payload when present.
    #[serde(default)]
    pub collection: Option<String>,
}

impl ActionRequest {
    fn into_parts(self) -> (String, Document) {
        let mut payload = match Value::from(self.payload) {
            Value::Document(doc) => doc,
            _ => Document::new(),
        };
        if let Some(collection) = self.collection {
            payload.insert("collection".to_string(), Value::String(collection));
        }
        (self.action, payload)
    }
}

/// Body of a `202 Accepted` from `POST /api/v1/requests`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub correlation_id: String,
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<dyn MessageQueue>,
    pub results: ResultCache,
    pub auth: Arc<dyn Authenticator>,
    pub start_time: Instant,
}

impl AppState {
    /// State with authentication disabled.
    pub fn new(dispatcher: Arc<Dispatcher>, queue: Arc<dyn MessageQueue>, results: ResultCache) -> Self {
        Self {
            dispatcher,
            queue,
            results,
            auth: Arc::new(OpenAuthenticator),
            start_time: Instant::now(),
        }
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("queue", &self.queue.name())
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Direct dispatch
        .route("/api/v1/actions", post(action_handler))
        // Deferred dispatch through the intake queue
        .route("/api/v1/requests", post(enqueue_handler))
        .route("/api/v1/responses/{correlation_id}", get(response_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware))
        .with_state(state)
}

/// Health check handler
#[instrument(skip(state))]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check handler: the store must answer a ping.
#[instrument(skip(state))]
async fn ready_handler(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.dispatcher.store().ping().await.map_err(|err| {
        warn!(error = %err, "store ping failed");
        ApiError::Unavailable(err.to_string())
    })?;
    Ok(StatusCode::OK)
}

/// Run an action and answer with its envelope.
#[instrument(skip(state, body))]
async fn action_handler(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    let request: ActionRequest =
        serde_json::from_slice(&body).map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?;
    let (action, payload) = request.into_parts();

    let envelope = state.dispatcher.dispatch(&action, payload).await;
    Ok((envelope_status(&envelope), Json(envelope)))
}

fn envelope_status(envelope: &Envelope) -> StatusCode {
    match envelope.kind {
        None => StatusCode::OK,
        Some(kind) if kind.is_client_error() => StatusCode::BAD_REQUEST,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Enqueue a request for the intake loop.
#[instrument(skip(state, body))]
async fn enqueue_handler(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    let mut request: serde_json::Value =
        serde_json::from_slice(&body).map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?;
    let fields = request
        .as_object_mut()
        .ok_or_else(|| ApiError::BadRequest("Request body must be a JSON object".to_string()))?;

    let correlation_id = match OperationRequest::correlation_id_of(fields.get("correlationId")) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            fields.insert("correlationId".to_string(), serde_json::Value::String(id.clone()));
            id
        }
    };

    let message_id = state.queue.send(request.to_string()).await?;
    info!(%correlation_id, %message_id, "request enqueued");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { correlation_id })))
}

/// Fetch a cached result.
#[instrument(skip(state))]
async fn response_handler(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<OperationResult>, ApiError> {
    state
        .results
        .get(&correlation_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No result for correlation id '{correlation_id}'")))
}

/// Serve `state` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = build_router(state);
    info!(addr = ?listener.local_addr().ok(), "DocRelay API listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use docrelay_broker::InMemoryQueue;
    use docrelay_cache::InMemoryCache;
    use docrelay_store::{DocumentStore, InMemoryDriver, StoreConfig};
    use serde_json::{json, Value as Json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        let store = DocumentStore::new(Arc::new(InMemoryDriver::new()), StoreConfig::default());
        AppState::new(
            Arc::new(Dispatcher::new(store)),
            Arc::new(InMemoryQueue::new(Duration::from_secs(30))),
            ResultCache::new(Arc::new(InMemoryCache::new()), Duration::from_secs(300)),
        )
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Json {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = build_router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let response = build_router(state())
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_action_merges_collection() {
        let body = json!({"action": "setNew", "collection": "users", "payload": {"dbName": "app", "data": {"n": 1}}});
        let response = build_router(state())
            .oneshot(post("/api/v1/actions", &body.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["data"]["n"], 1);
    }

    #[tokio::test]
    async fn test_action_client_errors_are_400() {
        let app = build_router(state());

        let response = app
            .clone()
            .oneshot(post("/api/v1/actions", r#"{"action": "frobnicate", "payload": {}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"success": false, "error": "Action 'frobnicate' not found or is not valid."})
        );

        let response = app.oneshot(post("/api/v1/actions", "{oops")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], 400);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let app = build_router(state());
        let index = json!({"action": "createIndex", "payload": {
            "dbName": "d", "collection": "c", "indexSpec": {"k": 1}, "options": {"unique": true}
        }});
        let insert = json!({"action": "setNew", "payload": {"dbName": "d", "collection": "c", "data": {"k": 1}}});

        app.clone().oneshot(post("/api/v1/actions", &index.to_string())).await.unwrap();
        app.clone().oneshot(post("/api/v1/actions", &insert.to_string())).await.unwrap();
        let response = app.oneshot(post("/api/v1/actions", &insert.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_enqueue_generates_correlation_id() {
        let state = state();
        let response = build_router(state.clone())
            .oneshot(post("/api/v1/requests", r#"{"action": "get", "payload": {}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["correlationId"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());

        let queued = state.queue.receive(1, Duration::ZERO).await.unwrap();
        let request = OperationRequest::parse(&queued[0].body).unwrap();
        assert_eq!(request.correlation_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_responses_lookup() {
        let state = state();
        state
            .results
            .put("known", &OperationResult::success(json!({"ok": true})), None)
            .await
            .unwrap();
        let app = build_router(state);

        let found = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/responses/known").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(body_json(found).await, json!({"status": "success", "data": {"ok": true}}));

        let missing = app
            .oneshot(Request::builder().uri("/api/v1/responses/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
