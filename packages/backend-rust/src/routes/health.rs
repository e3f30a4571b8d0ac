use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::HealthSnapshot;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthDto {
    status: &'static str,
    uptime_seconds: u64,
    started_at: String,
    database: Option<HealthSnapshot>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db_proxy() {
        Some(proxy) => Some(proxy.health_status().await),
        None => None,
    };

    let degraded = database.as_ref().map(|db| !db.healthy).unwrap_or(true);
    Json(HealthDto {
        status: if degraded { "degraded" } else { "ok" },
        uptime_seconds: state.uptime_seconds(),
        started_at: DateTime::<Utc>::from(state.started_at_system()).to_rfc3339(),
        database,
    })
}
