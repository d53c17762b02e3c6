//! HTTP handlers, grouped by resource, and the router that mounts them.

pub mod entities;
pub mod health;
pub mod runs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub use health::health_check;

/// All routes, each group carrying only the state its handlers need.
pub fn router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    let run_routes = Router::new()
        .route("/api/runs", post(runs::submit))
        .route("/api/runs/{run_id}", get(runs::get))
        .route("/api/runs/{run_id}/steps", get(runs::steps))
        .route("/api/runs/{run_id}/children", get(runs::children))
        .route("/api/runs/{run_id}/cancel", post(runs::cancel))
        .with_state(state.runs.clone());

    let entity_routes = Router::new()
        .route(
            "/api/entities/{org_id}/{entity_type}/upsert",
            post(entities::upsert),
        )
        .route(
            "/api/entities/{org_id}/{entity_type}/freshness",
            post(entities::freshness),
        )
        .route(
            "/api/entities/{org_id}/{entity_type}/{entity_id}",
            get(entities::get),
        )
        .route(
            "/api/entities/{org_id}/{entity_type}/{entity_id}/snapshots",
            get(entities::snapshots),
        )
        .route(
            "/api/entities/{org_id}/{entity_type}/{entity_id}/timeline",
            get(entities::timeline),
        )
        .with_state(state.entities);

    Router::new()
        .merge(health_routes)
        .merge(run_routes)
        .merge(entity_routes)
}
