//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use tracing::debug;

use crate::protocol::{
    ConnectModelRequest, ExecuteTaskRequest, ExecuteTaskResponse, HealthResponse,
    ListModelsResponse, MessageResponse, TaskStatus, TaskStatusResponse,
};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tasks_processing: state.executor.processing(),
        tasks_total: state.executor.total(),
        tracked_processes: state.processes.len().await,
        connected_models: state.backends.len().await,
    })
}

/// Connect a model backend.
pub async fn connect_model(
    State(state): State<AppState>,
    WithRejection(Json(request), _): WithRejection<Json<ConnectModelRequest>, ApiError>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .backends
        .connect(&request.model_id, &request.model_type, request.config)
        .await?;

    Ok(Json(MessageResponse::ok(format!(
        "Connected to {} model {}",
        request.model_type, request.model_id
    ))))
}

/// Submit a task for background execution.
pub async fn execute_task(
    State(state): State<AppState>,
    WithRejection(Json(request), _): WithRejection<Json<ExecuteTaskRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<ExecuteTaskResponse>)> {
    if request.model_id.trim().is_empty() {
        return Err(ApiError::bad_request("model_id must not be empty"));
    }

    let task_id = state
        .executor
        .submit(&request.model_id, &request.task_type, request.data);
    debug!(task_id = %task_id, "task accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteTaskResponse {
            success: true,
            task_id,
            status: TaskStatus::Processing,
        }),
    ))
}

/// Poll a task.
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskStatusResponse>> {
    state
        .executor
        .poll(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Task {task_id} not found")))
}

/// List connected models.
pub async fn list_models(State(state): State<AppState>) -> Json<ListModelsResponse> {
    Json(ListModelsResponse {
        success: true,
        models: state.backends.list().await,
    })
}

/// Disconnect a model backend.
pub async fn disconnect_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.backends.disconnect(&model_id).await?;

    Ok(Json(MessageResponse::ok(format!(
        "Disconnected from model {model_id}"
    ))))
}
