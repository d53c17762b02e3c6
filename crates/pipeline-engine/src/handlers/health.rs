//! Health check endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::health_check as db_health_check;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "unhealthy"
    pub status: String,

    /// Store backend in use
    pub store: String,

    /// Database connectivity; absent on the memory backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub uptime_seconds: u64,

    pub version: String,
}

/// `GET /health`
///
/// Returns `503 Service Unavailable` when the Postgres backend is configured
/// but unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (healthy, database) = match &state.db {
        Some(pool) => {
            let connected = db_health_check(pool).await;
            let label = if connected { "connected" } else { "disconnected" };
            (connected, Some(label.to_string()))
        }
        None => (true, None),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        store: state.store_label().to_string(),
        database,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
