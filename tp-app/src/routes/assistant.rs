use axum::routing::post;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::orchestrator::ExecutedFunction;
use crate::server::AppState;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/assistant/chat", post(chat))
        .route("/api/v1/assistant/thread", post(create_thread))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    thread_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct ChatResponseBody {
    thread_id: Uuid,
    message: String,
    executed_functions: Vec<ExecutedFunction>,
    has_pending_calls: bool,
    pending_calls_count: usize,
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::InvalidArguments(
            "message must not be empty".to_string(),
        ));
    }

    let outcome = state
        .orchestrator
        .handle_user_message(user.user_id, &req.message, req.thread_id)
        .await?;

    Ok(Json(ChatResponseBody {
        thread_id: outcome.thread_id,
        message: outcome.reply,
        executed_functions: outcome.executed_functions,
        has_pending_calls: outcome.has_pending_calls,
        pending_calls_count: outcome.pending_calls_count,
    }))
}

#[derive(Debug, Serialize)]
struct CreateThreadResponse {
    thread_id: Uuid,
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
async fn create_thread(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Json<CreateThreadResponse>, ApiError> {
    let thread_id = state.orchestrator.create_thread(user.user_id).await?;
    Ok(Json(CreateThreadResponse { thread_id }))
}
