use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tp_store::{NewTask, Priority, Task, TaskFilter, TaskPatch, TaskStore as _};
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::server::AppState;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/v1/tasks/{id}/complete", post(complete_task))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    priority: Option<Priority>,
    completed: Option<bool>,
    due_before: Option<DateTime<Utc>>,
    due_after: Option<DateTime<Utc>>,
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user.user_id))]
async fn list_tasks(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state
        .tasks
        .list(
            user.user_id,
            TaskFilter {
                priority: query.priority,
                completed: query.completed,
                due_before: query.due_before,
                due_after: query.due_after,
            },
        )
        .await?;
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    due_date: Option<DateTime<Utc>>,
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
async fn create_task(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::InvalidArguments(
            "title must not be empty".to_string(),
        ));
    }
    let task = state
        .tasks
        .create(
            user.user_id,
            NewTask {
                title: req.title,
                description: req.description,
                priority: req.priority.unwrap_or_default(),
                due_date: req.due_date,
                ai_generated: false,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user.user_id, task_id = %id))]
async fn get_task(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .tasks
        .get(user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))?;
    Ok(Json(task))
}

#[derive(Debug, Default, Deserialize)]
struct UpdateTaskRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    completed: Option<bool>,
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id, task_id = %id))]
async fn update_task(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    if req.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::InvalidArguments(
            "title must not be empty".to_string(),
        ));
    }
    let task = state
        .tasks
        .update(
            user.user_id,
            id,
            TaskPatch {
                title: req.title,
                description: req.description,
                priority: req.priority,
                due_date: req.due_date,
                completed: req.completed,
            },
        )
        .await?;
    Ok(Json(task))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id, task_id = %id))]
async fn delete_task(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tasks.delete(user.user_id, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true, "task_id": id })))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id, task_id = %id))]
async fn complete_task(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .tasks
        .update(
            user.user_id,
            id,
            TaskPatch {
                completed: Some(true),
                ..TaskPatch::default()
            },
        )
        .await?;
    Ok(Json(task))
}
