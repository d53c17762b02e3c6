//! Canonical entity reads, upserts and freshness checks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::models::{EntityRecord, EntitySnapshot, TimelineEvent};
use crate::engine::TimelineRecorder;
use crate::entity::{EntityStateStore, EntityType, Freshness, UpsertRequest, UpsertResult};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertEntityRequest {
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
    #[serde(default)]
    pub incoming_version: Option<i64>,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessRequest {
    pub identity: Map<String, Value>,
    pub max_age_hours: i64,
}

#[derive(Clone)]
pub struct EntityService {
    entities: EntityStateStore,
    timeline: TimelineRecorder,
}

impl EntityService {
    pub fn new(entities: EntityStateStore, timeline: TimelineRecorder) -> Self {
        Self { entities, timeline }
    }

    /// An entity of the given type. A matching id of another type is not found.
    pub async fn get(&self, org_id: &str, entity_type: EntityType, entity_id: Uuid) -> AppResult<EntityRecord> {
        self.entities
            .get(org_id, entity_id)
            .await?
            .filter(|record| record.entity_type == entity_type.as_str())
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", entity_type, entity_id)))
    }

    pub async fn snapshots(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> AppResult<Vec<EntitySnapshot>> {
        self.get(org_id, entity_type, entity_id).await?;
        self.entities.snapshots(org_id, entity_id).await
    }

    pub async fn timeline(
        &self,
        org_id: &str,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> AppResult<Vec<TimelineEvent>> {
        self.get(org_id, entity_type, entity_id).await?;
        self.timeline.events(org_id, entity_id).await
    }

    pub async fn upsert(
        &self,
        org_id: &str,
        entity_type: EntityType,
        request: UpsertEntityRequest,
    ) -> AppResult<UpsertResult> {
        let upsert = UpsertRequest {
            org_id: org_id.to_string(),
            entity_type,
            fields: request.fields,
            entity_id: request.entity_id,
            incoming_version: request.incoming_version,
            operation_id: request.operation_id,
            run_id: request.run_id,
        };
        self.entities.upsert(upsert).await
    }

    pub async fn freshness(
        &self,
        org_id: &str,
        entity_type: EntityType,
        request: FreshnessRequest,
    ) -> AppResult<Freshness> {
        self.entities
            .freshness(org_id, entity_type, &request.identity, request.max_age_hours)
            .await
    }
}
