mod assessments;
mod bkt;
mod health;
mod progress;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::db::DatabaseProxy;
use crate::response::{json_error, AppError};
use crate::state::AppState;

#[derive(Serialize)]
pub(crate) struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub(crate) fn success<T: Serialize>(data: T) -> axum::Json<SuccessResponse<T>> {
    axum::Json(SuccessResponse {
        success: true,
        data,
    })
}

pub(crate) fn require_proxy(state: &AppState) -> Result<Arc<DatabaseProxy>, AppError> {
    state
        .db_proxy()
        .ok_or_else(|| AppError::service_unavailable("database not available"))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/assessment/submit",
            post(assessments::submit).fallback(fallback_handler),
        )
        .route(
            "/bkt/update-from-pre/:user_id/:course_id",
            post(bkt::update_from_pre).fallback(fallback_handler),
        )
        .route(
            "/bkt/update-from-post/:user_id/:course_id",
            post(bkt::update_from_post).fallback(fallback_handler),
        )
        .route(
            "/bkt/recommendations/:user_id/:course_id",
            get(bkt::recommendations).fallback(fallback_handler),
        )
        .route(
            "/bkt/mastery-status/:user_id/:course_id",
            get(bkt::mastery_status).fallback(fallback_handler),
        )
        .route(
            "/bkt/improvement/:user_id/:course_id",
            get(bkt::improvement).fallback(fallback_handler),
        )
        .route(
            "/bkt/history/:user_id/:course_id",
            get(bkt::history).fallback(fallback_handler),
        )
        .route(
            "/bkt/status/:user_id",
            get(bkt::user_status).fallback(fallback_handler),
        )
        .route(
            "/progress/update",
            post(progress::update).fallback(fallback_handler),
        )
        .route(
            "/progress/:user_id",
            get(progress::list).fallback(fallback_handler),
        )
        .route(
            "/progress-recommendations/:user_id/:course_id",
            get(progress::recommendations).fallback(fallback_handler),
        )
        .nest("/health", health::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}
