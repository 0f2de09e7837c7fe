//! Typed API error for HTTP handlers.
//!
//! Converts domain errors into JSON responses with a machine-readable
//! `code`, so clients can tell authentication failures apart from
//! validation errors and idempotency rejections.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tp_store::StorageError;
use tp_tools::ToolError;

use crate::approvals::ApprovalError;
use crate::orchestrator::ChatError;

#[derive(Debug)]
pub enum ApiError {
    /// 401 — missing or unknown bearer credential.
    AuthenticationRequired,
    /// 404 — resource missing or owned by another user.
    NotFound(String),
    /// 409 — the call already reached a terminal status. Expected under
    /// double-clicks and retries, not a fault.
    AlreadyResolved(String),
    /// 409 — registration conflict.
    EmailTaken(String),
    /// 422 — request or function arguments failed validation.
    InvalidArguments(String),
    /// 502 — the LLM or persistence layer failed; retryable by the caller.
    Upstream(String),
    /// 500 — unexpected failure. Detail is logged, never leaked.
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                "authentication required".to_string(),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::AlreadyResolved(msg) => (StatusCode::CONFLICT, "already_resolved", msg),
            Self::EmailTaken(msg) => (StatusCode::CONFLICT, "email_taken", msg),
            Self::InvalidArguments(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_arguments", msg)
            }
            Self::Upstream(detail) => {
                tracing::warn!(error = %detail, "upstream failure surfaced to client");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_failure",
                    "the assistant is temporarily unavailable, please try again".to_string(),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error".to_string(),
                )
            }
        };
        let body = serde_json::json!({ "error": message, "code": code });
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id} not found")),
            StorageError::AlreadyResolved { id, status } => {
                Self::AlreadyResolved(format!("call {id} already resolved to {status}"))
            }
            StorageError::EmailTaken(email) => Self::EmailTaken(format!("{email} is already registered")),
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArguments(msg) => Self::InvalidArguments(msg),
            ToolError::UnknownFunction(name) => {
                Self::InvalidArguments(format!("unknown function: {name}"))
            }
            ToolError::NotFound(msg) => Self::NotFound(msg),
            ToolError::Storage(msg) => Self::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::ThreadNotFound(id) => Self::NotFound(format!("thread {id} not found")),
            ChatError::Upstream(detail) => Self::Upstream(detail),
            ChatError::Storage(e) => e.into(),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound(id) => Self::NotFound(format!("pending call {id} not found")),
            ApprovalError::AlreadyResolved(status) => {
                Self::AlreadyResolved(format!("call already resolved to {status}"))
            }
            ApprovalError::Storage(e) => e.into(),
        }
    }
}
