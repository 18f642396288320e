//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use hostbridge::api::{self, AppState};
use hostbridge::auth::{AuthConfig, AuthState};
use hostbridge::backend::BackendRegistry;
use hostbridge::local::ProcessTracker;
use hostbridge::task::ExecutorConfig;

pub const TEST_API_KEY: &str = "integration-test-key-0123456789";

/// Application state wired the way `hostbridge serve` wires it.
pub fn test_state() -> AppState {
    let auth_state = AuthState::new(&AuthConfig::with_api_key(TEST_API_KEY)).unwrap();
    let backends = Arc::new(BackendRegistry::new(Duration::from_secs(5)).unwrap());
    let processes = ProcessTracker::new(Duration::from_secs(2));
    AppState::new(auth_state, backends, processes, ExecutorConfig::default())
}

/// Create a test application with all services initialized.
pub fn test_app() -> Router {
    api::create_router(test_state())
}

/// Send one request with the test key. Returns the status and the JSON body
/// (`Value::Null` for an empty body).
pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with_token(app, method, uri, body, Some(TEST_API_KEY)).await
}

pub async fn send_with_token(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Submit a task and return its id.
pub async fn submit(app: &Router, task_type: &str, data: Value) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/execute_task",
        Some(json!({ "model_id": "test-agent", "task_type": task_type, "data": data })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {body}");
    body["task_id"].as_str().unwrap().to_string()
}

/// Poll `task_status` until the task leaves `processing`.
pub async fn wait_for_terminal(app: &Router, task_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, Method::GET, &format!("/task_status/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {task_id} never finished");
}

/// Serve a minimal Ollama API on an ephemeral port.
pub async fn fake_ollama(models: &'static [&'static str]) -> String {
    let app = Router::new()
        .route(
            "/api/tags",
            get(move || async move {
                let models: Vec<Value> = models.iter().map(|m| json!({ "name": m })).collect();
                Json(json!({ "models": models }))
            }),
        )
        .route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                Json(json!({
                    "model": body["model"],
                    "response": format!("echo: {prompt}"),
                    "done": true,
                }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
