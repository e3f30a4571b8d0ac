use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::response::AppError;
use crate::routes::{require_proxy, success};
use crate::services::bkt;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    threshold: Option<f64>,
    limit: Option<i64>,
}

/// POST /bkt/update-from-pre/:user_id/:course_id
pub async fn update_from_pre(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let lock = state.submission_lock(user_id, course_id);
    let _guard = lock.lock().await;

    let summary = bkt::update_from_pre(proxy.as_ref(), state.bkt(), user_id, course_id).await?;
    Ok(success(summary))
}

/// POST /bkt/update-from-post/:user_id/:course_id
pub async fn update_from_post(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let lock = state.submission_lock(user_id, course_id);
    let _guard = lock.lock().await;

    let summary = bkt::update_from_post(proxy.as_ref(), state.bkt(), user_id, course_id).await?;
    Ok(success(summary))
}

/// GET /bkt/recommendations/:user_id/:course_id?threshold=&limit=
pub async fn recommendations(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
    Query(query): Query<RecommendationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let threshold = query.threshold.unwrap_or(state.bkt().mastery_threshold);
    let limit = query.limit.unwrap_or(bkt::DEFAULT_RECOMMEND_LIMIT);

    let summary =
        bkt::get_recommendations(proxy.as_ref(), user_id, course_id, threshold, limit).await?;
    Ok(success(summary))
}

/// GET /bkt/mastery-status/:user_id/:course_id
pub async fn mastery_status(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let summary = bkt::mastery_status(proxy.as_ref(), user_id, course_id).await?;
    Ok(success(summary))
}

/// GET /bkt/improvement/:user_id/:course_id
pub async fn improvement(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let analysis = bkt::improvement_analysis(proxy.as_ref(), user_id, course_id).await?;
    Ok(success(analysis))
}

/// GET /bkt/history/:user_id/:course_id
pub async fn history(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let records = bkt::mastery_history(proxy.as_ref(), user_id, course_id).await?;
    Ok(success(records))
}

/// GET /bkt/status/:user_id
pub async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let records = bkt::user_mastery_records(proxy.as_ref(), user_id).await?;
    Ok(success(records))
}
