pub mod assistant;
pub mod health;
pub mod pending_calls;
pub mod tasks;
pub mod users;

use axum::Router;

/// Routes that require a bearer token.
pub fn protected_router() -> Router {
    Router::new()
        .merge(assistant::router())
        .merge(pending_calls::router())
        .merge(tasks::router())
}

/// Routes reachable without credentials.
pub fn public_router() -> Router {
    Router::new().merge(health::router()).merge(users::router())
}
