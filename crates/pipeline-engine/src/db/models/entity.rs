//! Canonical entity and entity snapshot rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Org-scoped, identity-resolved canonical record.
///
/// `(org_id, entity_id)` is unique. `record_version` increases by exactly one
/// per accepted write.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub org_id: String,
    pub entity_type: String,
    pub entity_id: Uuid,

    /// Identity key the id was derived from, e.g. `domain:acme.com`.
    pub natural_key: String,

    pub record_version: i64,

    /// Full merged canonical field set.
    pub canonical_payload: serde_json::Value,

    pub last_operation_id: Option<String>,
    pub last_run_id: Option<Uuid>,
    pub last_enriched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-write copy of an entity, keyed by the version it captured.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub id: i64,
    pub org_id: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub record_version: i64,
    pub canonical_payload: serde_json::Value,
    pub last_operation_id: Option<String>,
    pub last_run_id: Option<Uuid>,
    pub captured_at: DateTime<Utc>,
}

impl EntitySnapshot {
    /// Snapshot values for an entity about to be overwritten. `id` is
    /// assigned by the store.
    pub fn capture(record: &EntityRecord) -> Self {
        Self {
            id: 0,
            org_id: record.org_id.clone(),
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id,
            record_version: record.record_version,
            canonical_payload: record.canonical_payload.clone(),
            last_operation_id: record.last_operation_id.clone(),
            last_run_id: record.last_run_id,
            captured_at: Utc::now(),
        }
    }
}
