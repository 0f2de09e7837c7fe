//! Bearer-token authentication.
//!
//! Tokens are opaque; only their SHA-256 digest is stored. The middleware
//! resolves the token to a user and injects [`AuthedUser`] for handlers.

use axum::Extension;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tp_store::UserStore as _;
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;

/// The authenticated caller, available as a request extension behind
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: Uuid,
}

pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

/// New opaque bearer token. Returned to the caller exactly once.
pub fn generate_token() -> String {
    format!(
        "tp_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub async fn require_auth(
    Extension(state): Extension<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = parse_bearer_token(req.headers()) else {
        tracing::debug!(uri = %req.uri(), "request rejected: no bearer token");
        return ApiError::AuthenticationRequired.into_response();
    };

    let user = match state.users.find_by_token_hash(&hash_token(&token)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::debug!(uri = %req.uri(), "request rejected: unknown bearer token");
            return ApiError::AuthenticationRequired.into_response();
        }
        Err(e) => {
            return ApiError::Internal(anyhow::anyhow!(e)).into_response();
        }
    };

    req.extensions_mut().insert(AuthedUser { user_id: user.id });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_parsing_is_scheme_insensitive_and_trims() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("BEARER  tp_abc "));
        assert_eq!(parse_bearer_token(&headers).as_deref(), Some("tp_abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(parse_bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(parse_bearer_token(&headers).is_none());
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let a = hash_token("tp_example");
        let b = hash_token("tp_example");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("tp_other"));
    }
}
