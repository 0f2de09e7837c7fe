use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tp_store::UserStore as _;
use uuid::Uuid;

use crate::auth::{generate_token, hash_token};
use crate::error::ApiError;
use crate::server::AppState;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/auth/register", post(register))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    user_id: Uuid,
    /// Returned exactly once; only its hash is stored.
    token: String,
}

#[tracing::instrument(level = "info", skip_all)]
async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let email = req.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidArguments(
            "email must be a valid address".to_string(),
        ));
    }
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::InvalidArguments(
            "display_name must not be empty".to_string(),
        ));
    }

    let token = generate_token();
    let user = state
        .users
        .create_user(&email, display_name, &hash_token(&token))
        .await?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            token,
        }),
    ))
}
