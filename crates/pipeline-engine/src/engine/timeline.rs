//! Timeline Recorder: per-entity audit of terminal step transitions.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use super::context::Context;
use crate::db::models::{NewTimelineEvent, StepResult, TimelineEvent};
use crate::entity::{identity, schema, EntityType};
use crate::error::AppResult;
use crate::result_ext::ResultExt;
use crate::store::TimelineRepository;

/// The entity a step touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub org_id: String,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EntityRef {
    /// Resolve the entity a context describes, the same way an upsert of
    /// that context would. `None` when the context carries no entity fields.
    pub fn from_context(org_id: &str, entity_type: EntityType, context: &Context) -> Option<Self> {
        let validated = schema::validate(entity_type, context);
        let identity = identity::resolve_identity(entity_type, &validated.fields)?;
        Some(Self {
            org_id: org_id.to_string(),
            entity_type,
            entity_id: identity.entity_id,
        })
    }
}

#[derive(Clone)]
pub struct TimelineRecorder {
    repo: Arc<dyn TimelineRepository>,
}

impl TimelineRecorder {
    pub fn new(repo: Arc<dyn TimelineRepository>) -> Self {
        Self { repo }
    }

    /// Append one event for a terminal step result. Non-terminal results are
    /// ignored and write failures are logged, so this never fails the run.
    /// Returns whether an event was written.
    pub async fn record(&self, entity: &EntityRef, step: &StepResult) -> bool {
        if !step.status.is_terminal() {
            return false;
        }

        let event = NewTimelineEvent {
            org_id: entity.org_id.clone(),
            entity_type: entity.entity_type.as_str().to_string(),
            entity_id: entity.entity_id,
            run_id: step.run_id,
            position: step.position,
            attempt: step.attempt,
            operation_id: step.operation_id.clone(),
            status: step.status.as_str().to_string(),
            skip_reason: step.skip_reason.clone(),
            detail: Some(json!({
                "error": step.error,
                "duration_ms": step.duration_ms,
                "output_keys": step
                    .output
                    .as_ref()
                    .and_then(|o| o.as_object())
                    .map(|o| o.keys().cloned().collect::<Vec<_>>()),
            })),
        };

        self.repo
            .append_event(&event)
            .await
            .log(format!(
                "append timeline event for run {} position {}",
                step.run_id, step.position
            ))
            .is_ok()
    }

    pub async fn events(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<TimelineEvent>> {
        self.repo.list_events(org_id, entity_id).await
    }
}
