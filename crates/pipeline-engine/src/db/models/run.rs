//! Pipeline run rows.
//!
//! Runs form a tree through `parent_run_id`; `root_run_id` and `depth` are
//! denormalised so a whole tree can be listed and fan-out depth checked
//! without walking parents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::engine::state::RunStatus;

/// Database run record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,

    /// Owning organisation.
    pub org_id: String,

    /// `None` for root runs.
    pub parent_run_id: Option<Uuid>,

    pub root_run_id: Uuid,

    /// 0 for roots, parent depth + 1 for fan-out children.
    pub depth: i32,

    /// Canonical entity type the run enriches, when known up front.
    pub entity_type: Option<String>,

    /// Immutable step list captured at creation.
    pub blueprint_snapshot: serde_json::Value,

    /// Seed context (children: parent context merged with the seed item).
    pub initial_context: serde_json::Value,

    #[sqlx(try_from = "String")]
    pub status: RunStatus,

    pub start_position: i32,

    /// Structured [`RunError`](crate::engine::state::RunError) for failed runs.
    pub error: Option<serde_json::Value>,

    /// Terminal summary: entity upsert outcome or fan-out children.
    pub result: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Values for inserting a new run. The store assigns timestamps and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub id: Uuid,
    pub org_id: String,
    pub parent_run_id: Option<Uuid>,
    pub root_run_id: Uuid,
    pub depth: i32,
    pub entity_type: Option<String>,
    pub blueprint_snapshot: serde_json::Value,
    pub initial_context: serde_json::Value,
    pub start_position: i32,
}

impl NewRun {
    /// A queued root run.
    pub fn root(
        org_id: &str,
        entity_type: Option<String>,
        blueprint_snapshot: serde_json::Value,
        initial_context: serde_json::Value,
        start_position: i32,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            org_id: org_id.to_string(),
            parent_run_id: None,
            root_run_id: id,
            depth: 0,
            entity_type,
            blueprint_snapshot,
            initial_context,
            start_position,
        }
    }

    /// Materialise the row as the store will hold it right after insert.
    pub fn into_run(self, created_at: DateTime<Utc>) -> PipelineRun {
        PipelineRun {
            id: self.id,
            org_id: self.org_id,
            parent_run_id: self.parent_run_id,
            root_run_id: self.root_run_id,
            depth: self.depth,
            entity_type: self.entity_type,
            blueprint_snapshot: self.blueprint_snapshot,
            initial_context: self.initial_context,
            status: RunStatus::Queued,
            start_position: self.start_position,
            error: None,
            result: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Compare-and-set status change applied by the store.
#[derive(Debug, Clone)]
pub struct RunTransition {
    pub to: RunStatus,
    pub error: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

impl RunTransition {
    pub fn to(status: RunStatus) -> Self {
        Self {
            to: status,
            error: None,
            result: None,
        }
    }

    pub fn with_error(mut self, error: serde_json::Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_run_is_its_own_root() {
        let run = NewRun::root("org-1", None, json!({"steps": []}), json!({}), 1);
        assert_eq!(run.root_run_id, run.id);
        assert_eq!(run.depth, 0);
        assert!(run.parent_run_id.is_none());
    }

    #[test]
    fn test_into_run_starts_queued() {
        let run = NewRun::root("org-1", Some("company".into()), json!({"steps": []}), json!({}), 1)
            .into_run(Utc::now());
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());
        assert_eq!(run.entity_type.as_deref(), Some("company"));
    }
}
