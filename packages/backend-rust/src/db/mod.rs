pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("invalid database url: {0}")]
    InvalidUrl(sqlx::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
}

/// Owns the SQLite pool and the bootstrap lifecycle. Handed to services as an
/// injected store handle; tests build one over a temp-file database.
#[derive(Clone)]
pub struct DatabaseProxy {
    pool: SqlitePool,
}

impl DatabaseProxy {
    pub async fn connect(database_url: &str) -> Result<Self, DbInitError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(DbInitError::InvalidUrl)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // A single writer connection: SQLite serializes writes anyway, and
        // in-memory databases must not be split across connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        schema::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_status(&self) -> HealthSnapshot {
        let start = std::time::Instant::now();
        let result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        HealthSnapshot {
            healthy: result.is_ok(),
            latency_ms: result
                .is_ok()
                .then(|| start.elapsed().as_millis() as u64),
        }
    }
}
