//! Canonical entity API handlers.
//!
//! The org id is taken from the path; authentication and tenancy checks
//! belong to whatever fronts this service.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::db::models::{EntityRecord, EntitySnapshot, TimelineEvent};
use crate::entity::{EntityType, Freshness, UpsertResult};
use crate::error::AppError;
use crate::services::entity::{FreshnessRequest, UpsertEntityRequest};
use crate::services::EntityService;

/// `GET /api/entities/{org_id}/{entity_type}/{entity_id}`
pub async fn get(
    State(service): State<EntityService>,
    Path((org_id, entity_type, entity_id)): Path<(String, String, Uuid)>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity_type: EntityType = entity_type.parse()?;
    Ok(Json(service.get(&org_id, entity_type, entity_id).await?))
}

/// `GET /api/entities/{org_id}/{entity_type}/{entity_id}/snapshots`
pub async fn snapshots(
    State(service): State<EntityService>,
    Path((org_id, entity_type, entity_id)): Path<(String, String, Uuid)>,
) -> Result<Json<Vec<EntitySnapshot>>, AppError> {
    let entity_type: EntityType = entity_type.parse()?;
    Ok(Json(service.snapshots(&org_id, entity_type, entity_id).await?))
}

/// `GET /api/entities/{org_id}/{entity_type}/{entity_id}/timeline`
pub async fn timeline(
    State(service): State<EntityService>,
    Path((org_id, entity_type, entity_id)): Path<(String, String, Uuid)>,
) -> Result<Json<Vec<TimelineEvent>>, AppError> {
    let entity_type: EntityType = entity_type.parse()?;
    Ok(Json(service.timeline(&org_id, entity_type, entity_id).await?))
}

/// Versioned upsert. A stale write answers `200` with `outcome: "stale"`.
///
/// `POST /api/entities/{org_id}/{entity_type}/upsert`
pub async fn upsert(
    State(service): State<EntityService>,
    Path((org_id, entity_type)): Path<(String, String)>,
    Json(request): Json<UpsertEntityRequest>,
) -> Result<Json<UpsertResult>, AppError> {
    let entity_type: EntityType = entity_type.parse()?;
    Ok(Json(service.upsert(&org_id, entity_type, request).await?))
}

/// `POST /api/entities/{org_id}/{entity_type}/freshness`
pub async fn freshness(
    State(service): State<EntityService>,
    Path((org_id, entity_type)): Path<(String, String)>,
    Json(request): Json<FreshnessRequest>,
) -> Result<Json<Freshness>, AppError> {
    let entity_type: EntityType = entity_type.parse()?;
    Ok(Json(service.freshness(&org_id, entity_type, request).await?))
}
