use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::response::AppError;
use crate::routes::{require_proxy, success};
use crate::services::progress::{self, UpdateProgressRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    threshold: Option<f64>,
}

/// POST /progress/update
pub async fn update(
    State(state): State<AppState>,
    Json(payload): Json<UpdateProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let outcome = progress::update_progress(&state, proxy.as_ref(), payload).await?;
    Ok(success(outcome))
}

/// GET /progress/:user_id
pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let records = progress::get_progress(proxy.as_ref(), user_id).await?;
    Ok(success(records))
}

/// GET /progress-recommendations/:user_id/:course_id
pub async fn recommendations(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
    Query(query): Query<RecommendationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let threshold = query.threshold.unwrap_or(state.bkt().mastery_threshold);
    let summary =
        progress::progress_recommendations(proxy.as_ref(), user_id, course_id, threshold).await?;
    Ok(success(summary))
}
