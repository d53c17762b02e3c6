//! Per-entity timeline events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only record of one terminal step transition touching an entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: i64,
    pub org_id: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub run_id: Uuid,
    pub position: i32,
    pub attempt: i32,
    pub operation_id: String,

    /// Terminal step status (`succeeded`, `failed` or `skipped`).
    pub status: String,

    pub skip_reason: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Values for appending a timeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTimelineEvent {
    pub org_id: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub run_id: Uuid,
    pub position: i32,
    pub attempt: i32,
    pub operation_id: String,
    pub status: String,
    pub skip_reason: Option<String>,
    pub detail: Option<serde_json::Value>,
}

impl NewTimelineEvent {
    pub fn into_event(self, id: i64, created_at: DateTime<Utc>) -> TimelineEvent {
        TimelineEvent {
            id,
            org_id: self.org_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            run_id: self.run_id,
            position: self.position,
            attempt: self.attempt,
            operation_id: self.operation_id,
            status: self.status,
            skip_reason: self.skip_reason,
            detail: self.detail,
            created_at,
        }
    }
}
