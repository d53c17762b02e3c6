//! Postgres-backed store. Delegates to the query modules in [`crate::db::queries`].

use async_trait::async_trait;
use uuid::Uuid;

use super::{EntityRepository, RunStore, TimelineRepository};
use crate::db::models::{
    EntityRecord, EntitySnapshot, NewRun, NewStepResult, NewTimelineEvent, PipelineRun,
    RunTransition, StepCompletion, StepResult, TimelineEvent,
};
use crate::db::queries::{entities, runs, step_results, timeline};
use crate::db::DbPool;
use crate::engine::state::RunStatus;
use crate::error::AppResult;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn insert_run(&self, run: &NewRun) -> AppResult<PipelineRun> {
        runs::insert_run(&self.pool, run).await
    }

    async fn get_run(&self, run_id: Uuid) -> AppResult<Option<PipelineRun>> {
        runs::get_run(&self.pool, run_id).await
    }

    async fn transition_run(
        &self,
        run_id: Uuid,
        expected: &[RunStatus],
        transition: RunTransition,
    ) -> AppResult<bool> {
        runs::transition_run(&self.pool, run_id, expected, &transition).await
    }

    async fn list_children(&self, parent_run_id: Uuid) -> AppResult<Vec<PipelineRun>> {
        runs::list_children(&self.pool, parent_run_id).await
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> AppResult<Vec<PipelineRun>> {
        runs::list_runs_by_status(&self.pool, status).await
    }

    async fn insert_step_result(&self, result: &NewStepResult) -> AppResult<StepResult> {
        step_results::insert_step_result(&self.pool, result).await
    }

    async fn complete_step_result(
        &self,
        run_id: Uuid,
        position: i32,
        attempt: i32,
        completion: &StepCompletion,
    ) -> AppResult<StepResult> {
        step_results::complete_step_result(&self.pool, run_id, position, attempt, completion).await
    }

    async fn list_step_results(&self, run_id: Uuid) -> AppResult<Vec<StepResult>> {
        step_results::list_step_results(&self.pool, run_id).await
    }
}

#[async_trait]
impl EntityRepository for PgStore {
    async fn get_entity(&self, org_id: &str, entity_id: Uuid) -> AppResult<Option<EntityRecord>> {
        entities::get_entity(&self.pool, org_id, entity_id).await
    }

    async fn insert_entity(&self, record: &EntityRecord) -> AppResult<bool> {
        entities::insert_entity(&self.pool, record).await
    }

    async fn update_entity(&self, record: &EntityRecord, expected_version: i64) -> AppResult<bool> {
        entities::update_entity(&self.pool, record, expected_version).await
    }

    async fn insert_snapshot(&self, snapshot: &EntitySnapshot) -> AppResult<EntitySnapshot> {
        entities::insert_snapshot(&self.pool, snapshot).await
    }

    async fn list_snapshots(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<EntitySnapshot>> {
        entities::list_snapshots(&self.pool, org_id, entity_id).await
    }
}

#[async_trait]
impl TimelineRepository for PgStore {
    async fn append_event(&self, event: &NewTimelineEvent) -> AppResult<TimelineEvent> {
        timeline::append_event(&self.pool, event).await
    }

    async fn list_events(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<TimelineEvent>> {
        timeline::list_events(&self.pool, org_id, entity_id).await
    }
}
