//! Task records, parameters and failure classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backend::BackendError;
use crate::local::ProcessError;
use crate::ops::OpError;
use crate::protocol::{ErrorKind, TaskStatus, TaskStatusResponse};

/// Kinds of work a task can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SystemCommand,
    FileOperation,
    ProgramControl,
    ModelQuery,
}

impl TaskKind {
    /// Parse the wire name. `command` is accepted as a short alias.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "system_command" | "command" => Some(Self::SystemCommand),
            "file_operation" => Some(Self::FileOperation),
            "program_control" => Some(Self::ProgramControl),
            "model_query" => Some(Self::ModelQuery),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemCommand => "system_command",
            Self::FileOperation => "file_operation",
            Self::ProgramControl => "program_control",
            Self::ModelQuery => "model_query",
        }
    }
}

/// Parameters of a `system_command` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Parameters of a `file_operation` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum FileParams {
    Read { path: String },
    Write { path: String, content: String },
    Delete { path: String },
    List { path: String },
}

/// Parameters of a `program_control` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ProgramParams {
    Start {
        program_path: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Stop {
        pid: u32,
    },
    List,
}

/// Parameters of a `model_query` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub target_model: String,
    pub prompt: String,
}

/// A task failure, carried into the task record as `error` + `error_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<OpError> for TaskError {
    fn from(err: OpError) -> Self {
        let kind = match &err {
            OpError::NotFound(_) => ErrorKind::NotFound,
            OpError::NotADirectory(_) | OpError::InvalidInput(_) => ErrorKind::Validation,
            OpError::Timeout { .. } => ErrorKind::Timeout,
            OpError::Spawn { .. } | OpError::Io(_) => ErrorKind::Execution,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ProcessError> for TaskError {
    fn from(err: ProcessError) -> Self {
        let kind = match &err {
            ProcessError::NotTracked(_) => ErrorKind::NotFound,
            ProcessError::InvalidInput(_) => ErrorKind::Validation,
            ProcessError::Spawn { .. } => ErrorKind::Execution,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<BackendError> for TaskError {
    fn from(err: BackendError) -> Self {
        let kind = match &err {
            BackendError::NotConnected(_) | BackendError::ModelUnavailable(_) => {
                ErrorKind::NotFound
            }
            BackendError::UnsupportedKind(_) | BackendError::InvalidConfig(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Execution,
        };
        Self::new(kind, err.to_string())
    }
}

/// Terminal result of a task worker.
pub type Outcome = Result<Value, TaskError>;

/// A submitted task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub model_id: String,
    /// Task type exactly as submitted, even if unrecognised.
    pub task_type: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: String, model_id: String, task_type: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            model_id,
            task_type,
            status: TaskStatus::Processing,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub(crate) fn finish(&mut self, outcome: Outcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.status = TaskStatus::Completed;
            }
            Err(err) => {
                self.error = Some(err.message);
                self.error_kind = Some(err.kind);
                self.status = TaskStatus::Failed;
            }
        }
        self.updated_at = Utc::now();
        true
    }

    pub fn to_response(&self) -> TaskStatusResponse {
        TaskStatusResponse {
            task_id: self.id.clone(),
            model_id: self.model_id.clone(),
            task_type: self.task_type.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!(TaskKind::parse("system_command"), Some(TaskKind::SystemCommand));
        assert_eq!(TaskKind::parse("command"), Some(TaskKind::SystemCommand));
        assert_eq!(TaskKind::parse("model_query"), Some(TaskKind::ModelQuery));
        assert_eq!(TaskKind::parse("dance"), None);
        assert_eq!(TaskKind::FileOperation.as_str(), "file_operation");
    }

    #[test]
    fn test_file_params_require_content_for_write() {
        let params: FileParams =
            serde_json::from_value(json!({"operation": "read", "path": "/tmp/x"})).unwrap();
        assert_eq!(
            params,
            FileParams::Read {
                path: "/tmp/x".to_string()
            }
        );

        let err = serde_json::from_value::<FileParams>(json!({"operation": "write", "path": "/tmp/x"}))
            .unwrap_err();
        assert!(err.to_string().contains("content"));

        assert!(
            serde_json::from_value::<FileParams>(json!({"operation": "chmod", "path": "/tmp/x"}))
                .is_err()
        );
    }

    #[test]
    fn test_program_params() {
        let start: ProgramParams =
            serde_json::from_value(json!({"action": "start", "program_path": "sleep"})).unwrap();
        assert_eq!(
            start,
            ProgramParams::Start {
                program_path: "sleep".to_string(),
                args: vec![]
            }
        );

        let stop: ProgramParams =
            serde_json::from_value(json!({"action": "stop", "pid": 42})).unwrap();
        assert_eq!(stop, ProgramParams::Stop { pid: 42 });

        let list: ProgramParams = serde_json::from_value(json!({"action": "list"})).unwrap();
        assert_eq!(list, ProgramParams::List);
    }

    #[test]
    fn test_finish_only_once() {
        let mut task = Task::new("t".into(), "m".into(), "system_command".into());
        assert!(task.finish(Ok(json!({"success": true}))));
        assert_eq!(task.status, TaskStatus::Completed);

        assert!(!task.finish(Err(TaskError::internal("late"))));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());
        assert!(task.result.is_some());
    }

    #[test]
    fn test_failure_sets_error_not_result() {
        let mut task = Task::new("t".into(), "m".into(), "file_operation".into());
        task.finish(Err(OpError::NotFound("/nope".to_string()).into()));

        let resp = task.to_response();
        assert_eq!(resp.status, TaskStatus::Failed);
        assert!(resp.result.is_none());
        assert_eq!(resp.error.as_deref(), Some("not found: /nope"));
        assert_eq!(resp.error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_error_kind_mapping() {
        let err: TaskError = OpError::Timeout { secs: 1 }.into();
        assert_eq!(err.kind, ErrorKind::Timeout);

        let err: TaskError = ProcessError::NotTracked(7).into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: TaskError = BackendError::ConnectionFailed {
            url: "http://x".to_string(),
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Execution);
    }
}
