//! Background execution of submitted tasks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::models::{
    CommandParams, FileParams, Outcome, ProgramParams, QueryParams, TaskError, TaskKind,
};
use super::registry::TaskRegistry;
use crate::backend::BackendRegistry;
use crate::local::ProcessTracker;
use crate::ops;
use crate::protocol::TaskStatusResponse;

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tasks allowed to run at once; the rest wait as `processing`.
    pub max_concurrent: usize,
    /// Command deadline when the task does not set `timeout`.
    pub default_command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            default_command_timeout: Duration::from_secs(60),
        }
    }
}

/// Accepts tasks, runs each on its own tokio task and records the outcome.
///
/// Cloning is cheap and shares all state.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    tasks: Arc<TaskRegistry>,
    processes: ProcessTracker,
    backends: Arc<BackendRegistry>,
    limiter: Arc<Semaphore>,
    default_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        processes: ProcessTracker,
        backends: Arc<BackendRegistry>,
    ) -> Self {
        Self {
            tasks: Arc::new(TaskRegistry::new()),
            processes,
            backends,
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            default_timeout: config.default_command_timeout,
        }
    }

    /// Register a task and schedule it. Returns the id without waiting for
    /// any of the work to start.
    ///
    /// Unknown task types are accepted here and fail in the worker, so the
    /// caller can always poll the id.
    pub fn submit(&self, model_id: &str, task_type: &str, data: Value) -> String {
        let task_id = self.tasks.create(model_id, task_type);
        info!(task_id = %task_id, model_id, task_type, "task submitted");

        let executor = self.clone();
        let id = task_id.clone();
        let task_type = task_type.to_string();
        tokio::spawn(async move {
            executor.run(id, task_type, data).await;
        });

        task_id
    }

    /// Current state of a task, or `None` if the id was never issued.
    pub fn poll(&self, task_id: &str) -> Option<TaskStatusResponse> {
        self.tasks.get(task_id)
    }

    /// Tasks not yet terminal.
    pub fn processing(&self) -> usize {
        self.tasks.processing()
    }

    pub fn total(&self) -> usize {
        self.tasks.count()
    }

    async fn run(self, task_id: String, task_type: String, data: Value) {
        let _permit = match Arc::clone(&self.limiter).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.tasks
                    .finish(&task_id, Err(TaskError::internal("task executor is shut down")));
                return;
            }
        };

        debug!(task_id = %task_id, task_type = %task_type, "task started");

        // Nested spawn so a panicking handler surfaces as a JoinError.
        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.dispatch(&task_type, data).await });

        let outcome: Outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    format!("task worker panicked: {detail}")
                } else {
                    "task worker was cancelled".to_string()
                };
                error!(task_id = %task_id, "{}", message);
                Err(TaskError::internal(message))
            }
        };

        match &outcome {
            Ok(_) => info!(task_id = %task_id, status = "completed", "task finished"),
            Err(e) => info!(
                task_id = %task_id,
                status = "failed",
                error_kind = %e.kind,
                error = %e.message,
                "task finished"
            ),
        }
        self.tasks.finish(&task_id, outcome);
    }

    async fn dispatch(&self, task_type: &str, data: Value) -> Outcome {
        let kind = TaskKind::parse(task_type)
            .ok_or_else(|| TaskError::validation(format!("Unsupported task type: {task_type}")))?;

        match kind {
            TaskKind::SystemCommand => self.system_command(decode(data)?).await,
            TaskKind::FileOperation => file_operation(decode(data)?).await,
            TaskKind::ProgramControl => self.program_control(decode(data)?).await,
            TaskKind::ModelQuery => self.model_query(decode(data)?).await,
        }
    }

    async fn system_command(&self, params: CommandParams) -> Outcome {
        let timeout = match params.timeout {
            Some(0) => return Err(TaskError::validation("timeout must be at least 1 second")),
            Some(secs) => Duration::from_secs(secs),
            None => self.default_timeout,
        };

        let output = ops::run_command(
            &params.command,
            &params.args,
            params.working_dir.as_deref().map(Path::new),
            timeout,
        )
        .await?;

        serde_json::to_value(output).map_err(|e| TaskError::internal(e.to_string()))
    }

    async fn program_control(&self, params: ProgramParams) -> Outcome {
        match params {
            ProgramParams::Start { program_path, args } => {
                let pid = self.processes.start(&program_path, &args).await?;
                Ok(json!({
                    "success": true,
                    "pid": pid,
                    "message": format!("Program started with PID {pid}"),
                }))
            }
            ProgramParams::Stop { pid } => {
                let outcome = self.processes.stop(pid).await?;
                Ok(json!({
                    "success": true,
                    "pid": pid,
                    "forced": outcome.forced,
                    "exit_code": outcome.exit_code,
                    "message": format!("Program with PID {pid} stopped"),
                }))
            }
            ProgramParams::List => Ok(json!({
                "success": true,
                "processes": self.processes.list().await,
            })),
        }
    }

    async fn model_query(&self, params: QueryParams) -> Outcome {
        self.backends
            .query(&params.target_model, &params.prompt)
            .await
            .map_err(TaskError::from)
    }
}

async fn file_operation(params: FileParams) -> Outcome {
    let result = match params {
        FileParams::Read { path } => {
            let content = ops::read_file(Path::new(&path)).await?;
            json!({"success": true, "content": content})
        }
        FileParams::Write { path, content } => {
            ops::write_file(Path::new(&path), &content).await?;
            json!({"success": true, "path": path, "bytes_written": content.len()})
        }
        FileParams::Delete { path } => {
            ops::delete_path(Path::new(&path)).await?;
            json!({"success": true, "path": path})
        }
        FileParams::List { path } => {
            let files = ops::list_dir(Path::new(&path)).await?;
            json!({"success": true, "files": files})
        }
    };
    Ok(result)
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, TaskError> {
    serde_json::from_value(data).map_err(|e| TaskError::validation(format!("invalid task data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorKind, TaskStatus};
    use std::collections::HashSet;
    use std::time::Instant;
    use tempfile::TempDir;

    fn executor() -> TaskExecutor {
        executor_with(ExecutorConfig::default())
    }

    fn executor_with(config: ExecutorConfig) -> TaskExecutor {
        TaskExecutor::new(
            config,
            ProcessTracker::default(),
            Arc::new(BackendRegistry::new(Duration::from_secs(5)).unwrap()),
        )
    }

    async fn wait(executor: &TaskExecutor, id: &str) -> TaskStatusResponse {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let task = executor.poll(id).expect("task must exist");
            if task.status.is_terminal() {
                return task;
            }
            assert!(Instant::now() < deadline, "task {id} never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_poll_right_after_submit_finds_task() {
        let executor = executor();
        let id = executor.submit("client", "system_command", json!({"command": "echo", "args": ["hi"]}));
        assert!(executor.poll(&id).is_some());

        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        let result = task.result.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        assert!(executor().poll("no-such-task").is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_with_validation() {
        let executor = executor();
        let id = executor.submit("client", "teleport", json!({}));

        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::Validation));
        assert_eq!(task.task_type, "teleport");
        assert!(task.result.is_none());
        assert!(task.error.unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_malformed_params_fail_with_validation() {
        let executor = executor();
        let id = executor.submit("client", "file_operation", json!({"operation": "write", "path": "/tmp/x"}));

        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_nonzero_exit_completes_with_success_false() {
        let executor = executor();
        let id = executor.submit("client", "command", json!({"command": "sh", "args": ["-c", "exit 2"]}));

        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        let result = task.result.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["returncode"], 2);
    }

    #[tokio::test]
    async fn test_command_timeout_fails_quickly() {
        let executor = executor();
        let start = Instant::now();
        let id = executor.submit(
            "client",
            "system_command",
            json!({"command": "sleep", "args": ["5"], "timeout": 1}),
        );

        let task = wait(&executor, &id).await;
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::Timeout));
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let executor = executor();
        let id = executor.submit("client", "system_command", json!({"command": "echo", "timeout": 0}));

        let task = wait(&executor, &id).await;
        assert_eq!(task.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_file_round_trip_through_tasks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.txt").to_string_lossy().to_string();
        let executor = executor();

        let id = executor.submit(
            "client",
            "file_operation",
            json!({"operation": "write", "path": path, "content": "X"}),
        );
        assert_eq!(wait(&executor, &id).await.status, TaskStatus::Completed);

        let id = executor.submit("client", "file_operation", json!({"operation": "read", "path": path}));
        let task = wait(&executor, &id).await;
        assert_eq!(task.result.unwrap()["content"], "X");

        let id = executor.submit("client", "file_operation", json!({"operation": "delete", "path": path}));
        assert_eq!(wait(&executor, &id).await.status, TaskStatus::Completed);

        let id = executor.submit("client", "file_operation", json!({"operation": "read", "path": path}));
        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_program_start_list_stop() {
        let executor = executor();

        let id = executor.submit(
            "client",
            "program_control",
            json!({"action": "start", "program_path": "sleep", "args": ["30"]}),
        );
        let task = wait(&executor, &id).await;
        let pid = task.result.unwrap()["pid"].as_u64().unwrap();

        let id = executor.submit("client", "program_control", json!({"action": "list"}));
        let listed = wait(&executor, &id).await.result.unwrap();
        assert_eq!(listed["processes"][0]["pid"], pid);

        let id = executor.submit("client", "program_control", json!({"action": "stop", "pid": pid}));
        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);

        let id = executor.submit("client", "program_control", json!({"action": "stop", "pid": pid}));
        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_query_unconnected_model() {
        let executor = executor();
        let id = executor.submit(
            "client",
            "model_query",
            json!({"target_model": "ghost", "prompt": "hi"}),
        );

        let task = wait(&executor, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_are_distinct_and_consistent() {
        let executor = executor_with(ExecutorConfig {
            max_concurrent: 4,
            ..ExecutorConfig::default()
        });

        let submitters: Vec<_> = (0..50)
            .map(|i| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    executor.submit(
                        "client",
                        "system_command",
                        json!({"command": "echo", "args": [i.to_string()]}),
                    )
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in submitters {
            ids.push(handle.await.unwrap());
        }
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 50);

        // Every snapshot must pair status with exactly the matching payload.
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let mut done = 0;
            for id in &ids {
                let task = executor.poll(id).unwrap();
                match task.status {
                    TaskStatus::Processing => {
                        assert!(task.result.is_none() && task.error.is_none());
                    }
                    TaskStatus::Completed => {
                        assert!(task.result.is_some() && task.error.is_none());
                        done += 1;
                    }
                    TaskStatus::Failed => {
                        assert!(task.result.is_none() && task.error.is_some());
                        done += 1;
                    }
                }
            }
            if done == ids.len() {
                break;
            }
            assert!(Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(executor.processing(), 0);
    }
}
