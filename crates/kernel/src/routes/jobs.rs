//! Job runner endpoint.
//!
//! Receives dispatches posted by [`HttpJobTrigger`](crate::jobs::HttpJobTrigger).

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::jobs::{Dispatch, JobResult, PROCESS_PATH};
use crate::state::AppState;

/// Create the job router.
pub fn router() -> Router<AppState> {
    Router::new().route(PROCESS_PATH, post(process))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Run one dispatched job.
async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(dispatch): Json<Dispatch>,
) -> AppResult<Json<JobResult>> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    info!(job = %dispatch.name, "job dispatch received");
    let result = state.job_runner().execute(token, dispatch).await?;
    Ok(Json(result))
}
