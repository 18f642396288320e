//! Wire types shared by the HTTP API and the client library.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed are final; nothing moves a task out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown task type or malformed parameters.
    Validation,
    /// Missing file, directory, process or model.
    NotFound,
    /// A command ran past its deadline and was killed.
    Timeout,
    /// The work could not be carried out (spawn failure, backend error, IO).
    Execution,
    /// The worker itself failed.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /execute_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskRequest {
    pub model_id: String,
    pub task_type: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Answer to `POST /execute_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskResponse {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
}

/// Answer to `GET /task_status/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub model_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /connect_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectModelRequest {
    pub model_id: String,
    pub model_type: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

/// A connected model as reported by `GET /list_models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub success: bool,
    pub models: Vec<ModelInfo>,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Answer to `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tasks_processing: usize,
    /// Tasks issued since start, including finished ones.
    pub tasks_total: usize,
    pub tracked_processes: usize,
    pub connected_models: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_status_serialization() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Processing).unwrap(),
            json!("processing")
        );
        assert_eq!(
            serde_json::from_value::<TaskStatus>(json!("failed")).unwrap(),
            TaskStatus::Failed
        );
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_error_kind_is_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorKind::NotFound).unwrap(),
            json!("not_found")
        );
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_execute_request_defaults_data() {
        let req: ExecuteTaskRequest =
            serde_json::from_value(json!({"model_id": "m", "task_type": "system_command"}))
                .unwrap();
        assert_eq!(req.data, json!({}));
    }

    #[test]
    fn test_status_response_omits_missing_error_kind() {
        let now = Utc::now();
        let resp = TaskStatusResponse {
            task_id: "t1".to_string(),
            model_id: "m".to_string(),
            task_type: "system_command".to_string(),
            status: TaskStatus::Processing,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"], Value::Null);
        assert_eq!(value["error"], Value::Null);
        assert!(value.get("error_kind").is_none());
    }

    #[test]
    fn test_model_info_uses_type_field() {
        let info = ModelInfo {
            model_id: "llama3".to_string(),
            model_type: "ollama".to_string(),
            config: json!({"host": "http://localhost:11434"}),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["type"], "ollama");
    }
}
