use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Extension, Json};
use std::sync::Arc;
use tp_store::{PendingCall, PendingCallStore as _};
use uuid::Uuid;

use crate::approvals::{ApprovalOutcome, RejectionOutcome};
use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::server::AppState;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/assistant/pending-calls", get(list_pending))
        .route("/api/v1/assistant/pending-calls/{id}/approve", post(approve))
        .route("/api/v1/assistant/pending-calls/{id}/reject", post(reject))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user.user_id))]
async fn list_pending(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Json<Vec<PendingCall>>, ApiError> {
    let calls = state.calls.list_pending(user.user_id).await?;
    Ok(Json(calls))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id, call_id = %id))]
async fn approve(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let outcome = state.approvals.approve(user.user_id, id).await?;
    Ok(Json(outcome))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user.user_id, call_id = %id))]
async fn reject(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<RejectionOutcome>, ApiError> {
    let outcome = state.approvals.reject(user.user_id, id).await?;
    Ok(Json(outcome))
}
