//! Dispatching and polling bulk bucket tasks.

use crate::{
    auth::Caller,
    errors::AppError,
    services::task_dispatcher::{DispatchedTask, TaskProgress},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

/// `POST /api/tasks/empty-bucket/{bucket}`
pub async fn empty_bucket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(bucket): Path<String>,
) -> Result<(StatusCode, Json<DispatchedTask>), AppError> {
    let task = state.dispatcher.dispatch_empty(&caller, &bucket).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// `POST /api/tasks/copy-bucket/{src}/{dest}`
pub async fn copy_bucket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((src, dest)): Path<(String, String)>,
) -> Result<(StatusCode, Json<DispatchedTask>), AppError> {
    let task = state.dispatcher.dispatch_copy(&caller, &src, &dest).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// `GET /api/tasks/{task_id}`
pub async fn task_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(task_id): Path<String>,
) -> Result<Json<TaskProgress>, AppError> {
    let task_id = Uuid::parse_str(&task_id).map_err(|_| AppError::validation("invalid task id"))?;
    Ok(Json(state.dispatcher.task_progress(&caller, task_id).await?))
}
