//! Persistence seams used by the engine.
//!
//! The engine never talks to a database directly. It depends on these
//! traits, backed by [`PgStore`] in production and [`InMemoryStore`] for
//! tests and single-process deployments.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::{
    EntityRecord, EntitySnapshot, NewRun, NewStepResult, NewTimelineEvent, PipelineRun,
    RunTransition, StepCompletion, StepResult, TimelineEvent,
};
use crate::engine::state::RunStatus;
use crate::error::AppResult;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Pipeline runs and their step results.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: &NewRun) -> AppResult<PipelineRun>;

    async fn get_run(&self, run_id: Uuid) -> AppResult<Option<PipelineRun>>;

    /// Compare-and-set status change. Applies only when the current status is
    /// one of `expected`; returns whether it did. Sets `started_at` on entry
    /// to running and `completed_at` on entry to a terminal state.
    async fn transition_run(
        &self,
        run_id: Uuid,
        expected: &[RunStatus],
        transition: RunTransition,
    ) -> AppResult<bool>;

    /// Direct children, oldest first.
    async fn list_children(&self, parent_run_id: Uuid) -> AppResult<Vec<PipelineRun>>;

    async fn list_runs_by_status(&self, status: RunStatus) -> AppResult<Vec<PipelineRun>>;

    /// Fails with `Conflict` if (run, position, attempt) already exists.
    async fn insert_step_result(&self, result: &NewStepResult) -> AppResult<StepResult>;

    async fn complete_step_result(
        &self,
        run_id: Uuid,
        position: i32,
        attempt: i32,
        completion: &StepCompletion,
    ) -> AppResult<StepResult>;

    /// All step results of a run ordered by (position, attempt).
    async fn list_step_results(&self, run_id: Uuid) -> AppResult<Vec<StepResult>>;
}

/// Canonical entities and their snapshots.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn get_entity(&self, org_id: &str, entity_id: Uuid) -> AppResult<Option<EntityRecord>>;

    /// Insert a new entity. Returns `false` if (org, entity_id) already exists.
    async fn insert_entity(&self, record: &EntityRecord) -> AppResult<bool>;

    /// Replace an entity only if its stored version is still
    /// `expected_version`. Returns whether the write landed.
    async fn update_entity(&self, record: &EntityRecord, expected_version: i64) -> AppResult<bool>;

    /// Fails with `Conflict` on a duplicate (org, type, id, version).
    async fn insert_snapshot(&self, snapshot: &EntitySnapshot) -> AppResult<EntitySnapshot>;

    /// Snapshots of one entity ordered by version.
    async fn list_snapshots(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<EntitySnapshot>>;
}

/// Append-only entity timelines.
#[async_trait]
pub trait TimelineRepository: Send + Sync {
    async fn append_event(&self, event: &NewTimelineEvent) -> AppResult<TimelineEvent>;

    /// Events of one entity, oldest first.
    async fn list_events(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<TimelineEvent>>;
}
