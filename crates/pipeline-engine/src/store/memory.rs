//! In-process store backed by `RwLock`-guarded maps.
//!
//! Used by tests and by `PIPELINE_STORE_BACKEND=memory`. Enforces the same
//! uniqueness and compare-and-set rules as the Postgres store. State is lost
//! when the process exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{EntityRepository, RunStore, TimelineRepository};
use crate::db::models::{
    EntityRecord, EntitySnapshot, NewRun, NewStepResult, NewTimelineEvent, PipelineRun,
    RunTransition, StepCompletion, StepResult, TimelineEvent,
};
use crate::engine::state::RunStatus;
use crate::error::{AppError, AppResult};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<Uuid, PipelineRun>,
    /// Insertion order, for stable child listings.
    run_order: Vec<Uuid>,
    steps: HashMap<Uuid, Vec<StepResult>>,
    entities: HashMap<(String, Uuid), EntityRecord>,
    snapshots: Vec<EntitySnapshot>,
    events: Vec<TimelineEvent>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

fn poison_err<T>(_: PoisonError<T>) -> AppError {
    AppError::Internal("in-memory store lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(poison_err)
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(poison_err)
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn insert_run(&self, run: &NewRun) -> AppResult<PipelineRun> {
        let mut inner = self.write()?;
        if inner.runs.contains_key(&run.id) {
            return Err(AppError::Conflict(format!("Run {} already exists", run.id)));
        }
        let record = run.clone().into_run(Utc::now());
        inner.runs.insert(record.id, record.clone());
        inner.run_order.push(record.id);
        Ok(record)
    }

    async fn get_run(&self, run_id: Uuid) -> AppResult<Option<PipelineRun>> {
        Ok(self.read()?.runs.get(&run_id).cloned())
    }

    async fn transition_run(
        &self,
        run_id: Uuid,
        expected: &[RunStatus],
        transition: RunTransition,
    ) -> AppResult<bool> {
        let mut inner = self.write()?;
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Ok(false);
        };
        if !expected.contains(&run.status) {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = transition.to;
        if transition.to == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if transition.to.is_terminal() {
            run.completed_at = Some(now);
        }
        if transition.error.is_some() {
            run.error = transition.error;
        }
        if transition.result.is_some() {
            run.result = transition.result;
        }
        Ok(true)
    }

    async fn list_children(&self, parent_run_id: Uuid) -> AppResult<Vec<PipelineRun>> {
        let inner = self.read()?;
        Ok(inner
            .run_order
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .filter(|run| run.parent_run_id == Some(parent_run_id))
            .cloned()
            .collect())
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> AppResult<Vec<PipelineRun>> {
        let inner = self.read()?;
        Ok(inner
            .run_order
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .filter(|run| run.status == status)
            .cloned()
            .collect())
    }

    async fn insert_step_result(&self, result: &NewStepResult) -> AppResult<StepResult> {
        let mut inner = self.write()?;
        let duplicate = inner.steps.get(&result.run_id).is_some_and(|steps| {
            steps
                .iter()
                .any(|s| s.position == result.position && s.attempt == result.attempt)
        });
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Step result exists for run {} position {} attempt {}",
                result.run_id, result.position, result.attempt
            )));
        }

        let id = inner.next_id();
        let record = result.clone().into_result(id);
        let steps = inner.steps.entry(result.run_id).or_default();
        steps.push(record.clone());
        steps.sort_by_key(|s| (s.position, s.attempt));
        Ok(record)
    }

    async fn complete_step_result(
        &self,
        run_id: Uuid,
        position: i32,
        attempt: i32,
        completion: &StepCompletion,
    ) -> AppResult<StepResult> {
        let mut inner = self.write()?;
        let step = inner
            .steps
            .get_mut(&run_id)
            .and_then(|steps| {
                steps
                    .iter_mut()
                    .find(|s| s.position == position && s.attempt == attempt)
            })
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Step result for run {} position {} attempt {}",
                    run_id, position, attempt
                ))
            })?;
        completion.apply_to(step);
        Ok(step.clone())
    }

    async fn list_step_results(&self, run_id: Uuid) -> AppResult<Vec<StepResult>> {
        Ok(self.read()?.steps.get(&run_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EntityRepository for InMemoryStore {
    async fn get_entity(&self, org_id: &str, entity_id: Uuid) -> AppResult<Option<EntityRecord>> {
        Ok(self
            .read()?
            .entities
            .get(&(org_id.to_string(), entity_id))
            .cloned())
    }

    async fn insert_entity(&self, record: &EntityRecord) -> AppResult<bool> {
        let mut inner = self.write()?;
        let key = (record.org_id.clone(), record.entity_id);
        if inner.entities.contains_key(&key) {
            return Ok(false);
        }
        inner.entities.insert(key, record.clone());
        Ok(true)
    }

    async fn update_entity(&self, record: &EntityRecord, expected_version: i64) -> AppResult<bool> {
        let mut inner = self.write()?;
        match inner.entities.get_mut(&(record.org_id.clone(), record.entity_id)) {
            Some(stored) if stored.record_version == expected_version => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_snapshot(&self, snapshot: &EntitySnapshot) -> AppResult<EntitySnapshot> {
        let mut inner = self.write()?;
        let duplicate = inner.snapshots.iter().any(|s| {
            s.org_id == snapshot.org_id
                && s.entity_type == snapshot.entity_type
                && s.entity_id == snapshot.entity_id
                && s.record_version == snapshot.record_version
        });
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Snapshot exists for entity {} version {}",
                snapshot.entity_id, snapshot.record_version
            )));
        }

        let mut stored = snapshot.clone();
        stored.id = inner.next_id();
        inner.snapshots.push(stored.clone());
        Ok(stored)
    }

    async fn list_snapshots(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<EntitySnapshot>> {
        let inner = self.read()?;
        let mut snapshots: Vec<EntitySnapshot> = inner
            .snapshots
            .iter()
            .filter(|s| s.org_id == org_id && s.entity_id == entity_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.record_version);
        Ok(snapshots)
    }
}

#[async_trait]
impl TimelineRepository for InMemoryStore {
    async fn append_event(&self, event: &NewTimelineEvent) -> AppResult<TimelineEvent> {
        let mut inner = self.write()?;
        let id = inner.next_id();
        let stored = event.clone().into_event(id, Utc::now());
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<TimelineEvent>> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| e.org_id == org_id && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
