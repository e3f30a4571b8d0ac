use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::response::AppError;
use crate::routes::{require_proxy, success};
use crate::services::evidence::{self, SubmitAssessmentRequest};
use crate::state::AppState;

/// POST /assessment/submit
pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitAssessmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = require_proxy(&state)?;
    let outcome = evidence::submit_assessment(&state, proxy.as_ref(), payload).await?;
    Ok(success(outcome))
}
