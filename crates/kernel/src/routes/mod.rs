//! HTTP route handlers.

pub mod health;
pub mod jobs;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full HTTP surface.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
