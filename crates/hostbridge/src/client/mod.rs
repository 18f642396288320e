//! Async client for the hostbridge HTTP API.
//!
//! Tasks are fire-and-poll on the server side; the convenience wrappers here
//! submit a task and poll `task_status` until it reaches a terminal status.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::{
    ConnectModelRequest, ExecuteTaskRequest, ExecuteTaskResponse, HealthResponse,
    ListModelsResponse, MessageResponse, ModelInfo, TaskStatusResponse,
};
use crate::task::{CommandParams, FileParams, ProgramParams, QueryParams};

/// Interval between two `task_status` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors returned by [`ControlClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("task {task_id} did not finish in time")]
    Timeout { task_id: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Client for a running hostbridge server.
#[derive(Clone)]
pub struct ControlClient {
    client: Client,
    base_url: String,
    api_key: String,
    model_id: String,
    poll_interval: Duration,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ControlClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model_id: "hostbridgectl".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Name reported as `model_id` on submitted tasks.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Interval used by the submit-and-wait wrappers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        handle_response(response).await
    }

    pub async fn connect_model(
        &self,
        model_id: &str,
        model_type: &str,
        config: Value,
    ) -> ClientResult<MessageResponse> {
        let request = ConnectModelRequest {
            model_id: model_id.to_string(),
            model_type: model_type.to_string(),
            config,
        };
        self.post_json("/connect_model", &request).await
    }

    pub async fn disconnect_model(&self, model_id: &str) -> ClientResult<MessageResponse> {
        let response = self
            .client
            .post(self.url(&format!("/disconnect_model/{model_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        handle_response(response).await
    }

    pub async fn list_models(&self) -> ClientResult<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.url("/list_models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body: ListModelsResponse = handle_response(response).await?;
        Ok(body.models)
    }

    /// Submit a task and return its id without waiting.
    pub async fn submit_task(&self, task_type: &str, data: Value) -> ClientResult<String> {
        let request = ExecuteTaskRequest {
            model_id: self.model_id.clone(),
            task_type: task_type.to_string(),
            data,
        };
        let body: ExecuteTaskResponse = self.post_json("/execute_task", &request).await?;
        Ok(body.task_id)
    }

    pub async fn task_status(&self, task_id: &str) -> ClientResult<TaskStatusResponse> {
        let response = self
            .client
            .get(self.url(&format!("/task_status/{task_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        handle_response(response).await
    }

    /// Poll until the task is completed or failed.
    ///
    /// Without a deadline this polls indefinitely.
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        poll_interval: Duration,
        deadline: Option<Duration>,
    ) -> ClientResult<TaskStatusResponse> {
        let started = Instant::now();
        loop {
            let status = self.task_status(task_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                return Err(ClientError::Timeout {
                    task_id: task_id.to_string(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn run_command(&self, params: CommandParams) -> ClientResult<TaskStatusResponse> {
        self.submit_and_wait("system_command", &params).await
    }

    pub async fn read_file(&self, path: &str) -> ClientResult<TaskStatusResponse> {
        let params = FileParams::Read {
            path: path.to_string(),
        };
        self.submit_and_wait("file_operation", &params).await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> ClientResult<TaskStatusResponse> {
        let params = FileParams::Write {
            path: path.to_string(),
            content: content.to_string(),
        };
        self.submit_and_wait("file_operation", &params).await
    }

    pub async fn delete_path(&self, path: &str) -> ClientResult<TaskStatusResponse> {
        let params = FileParams::Delete {
            path: path.to_string(),
        };
        self.submit_and_wait("file_operation", &params).await
    }

    pub async fn list_dir(&self, path: &str) -> ClientResult<TaskStatusResponse> {
        let params = FileParams::List {
            path: path.to_string(),
        };
        self.submit_and_wait("file_operation", &params).await
    }

    pub async fn start_program(
        &self,
        program_path: &str,
        args: Vec<String>,
    ) -> ClientResult<TaskStatusResponse> {
        let params = ProgramParams::Start {
            program_path: program_path.to_string(),
            args,
        };
        self.submit_and_wait("program_control", &params).await
    }

    pub async fn stop_program(&self, pid: u32) -> ClientResult<TaskStatusResponse> {
        self.submit_and_wait("program_control", &ProgramParams::Stop { pid })
            .await
    }

    pub async fn list_programs(&self) -> ClientResult<TaskStatusResponse> {
        self.submit_and_wait("program_control", &ProgramParams::List)
            .await
    }

    pub async fn query_model(
        &self,
        target_model: &str,
        prompt: &str,
    ) -> ClientResult<TaskStatusResponse> {
        let params = QueryParams {
            target_model: target_model.to_string(),
            prompt: prompt.to_string(),
        };
        self.submit_and_wait("model_query", &params).await
    }

    async fn submit_and_wait<P: Serialize>(
        &self,
        task_type: &str,
        params: &P,
    ) -> ClientResult<TaskStatusResponse> {
        let data = serde_json::to_value(params).map_err(|e| ClientError::Parse(e.to_string()))?;
        let task_id = self.submit_task(task_type, data).await?;
        self.wait_for_task(&task_id, self.poll_interval, None).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ClientError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
}

/// Pull the `error` field out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "empty response".to_string()
            } else {
                body.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ControlClient::new("http://localhost:8000/", "key").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/health"), "http://localhost:8000/health");
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"success":false,"error":"Not found: Task x not found","code":"NOT_FOUND"}"#;
        assert_eq!(error_message(body), "Not found: Task x not found");

        let body = r#"{"error":"invalid API key","error_code":"INVALID_API_KEY"}"#;
        assert_eq!(error_message(body), "invalid API key");

        assert_eq!(error_message("gateway down"), "gateway down");
        assert_eq!(error_message(""), "empty response");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = ControlClient::new("http://localhost:8000", "super-secret").unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let client = ControlClient::new("http://127.0.0.1:1", "key").unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
    }
}
