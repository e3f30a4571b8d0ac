pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::state::{AppState, BktSettings};

/// Router wired from the environment, shared by main and the test harness.
pub async fn create_app() -> axum::Router {
    let config = Config::from_env();

    let db_proxy = match db::DatabaseProxy::connect(&config.database_url).await {
        Ok(proxy) => Some(Arc::new(proxy)),
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized");
            None
        }
    };

    let state = AppState::new(
        db_proxy,
        BktSettings {
            params: config.bkt,
            mastery_threshold: config.mastery_threshold,
        },
    );

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
