//! Pipeline Runner: drives one run from its start position to a terminal
//! state.
//!
//! The runner is the only stateful orchestrator. Everything it knows about a
//! run is reloaded from the [`RunStore`] on entry, so any process can pick up
//! a queued run. Per step it:
//!
//! 1. checks for cancellation,
//! 2. evaluates the explicit condition,
//! 3. applies the freshness gate,
//! 4. calls the Step Executor Bridge,
//! 5. merges output and records the terminal step result,
//! 6. stops on failure (unless the step opts out) or on a multi-item fan-out.
//!
//! Timeline events for the execution's terminal step results are written
//! once it ends, all under the entity the run settled on.
//!
//! Skips and step failures are step statuses. Only store failures surface as
//! `Err`, after a best-effort attempt to mark the run failed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::condition;
use super::context::{self, Context};
use super::fan_out::{fan_out_seeds, FanOutCoordinator};
use super::state::{
    next_attempt, reconstruct_context, RunError, RunErrorCode, RunStatus, SkipReason, StepStatus,
};
use super::timeline::{EntityRef, TimelineRecorder};
use crate::blueprint::{parse_blueprint, SkipIfFresh, StepSpec};
use crate::db::models::{
    NewStepResult, PipelineRun, RunTransition, StepCompletion, StepResult,
};
use crate::entity::{EntityStateStore, EntityType, UpsertRequest};
use crate::error::{AppError, AppResult};
use crate::executor::{OperationExecutor, OperationRequest, OperationResponse};
use crate::result_ext::{OptionResultExt, ResultExt};
use crate::store::RunStore;

/// Where one execution of a run ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Children created (or reused) by a fan-out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Uuid>,
}

impl RunOutcome {
    fn new(run_id: Uuid, status: RunStatus) -> Self {
        Self {
            run_id,
            status,
            children: Vec::new(),
        }
    }
}

/// Per-execution bookkeeping threaded through the step loop.
struct Execution<'a> {
    run: &'a PipelineRun,
    prior: Vec<StepResult>,
    context: Context,
    /// Entity type used for the final upsert.
    entity_type: Option<EntityType>,
    last_operation_id: Option<String>,
    /// Terminal step results awaiting their timeline event.
    timeline: Vec<(Option<EntityType>, StepResult)>,
    /// Entity the final upsert landed on.
    upserted: Option<(EntityType, Uuid)>,
}

impl Execution<'_> {
    fn attempt(&self, position: i32) -> i32 {
        next_attempt(&self.prior, position)
    }

    fn entity_type_for(&self, step: &StepSpec) -> Option<EntityType> {
        step.entity_type().or(self.entity_type)
    }

    fn note_terminal(&mut self, step: &StepSpec, result: &StepResult) {
        let entity_type = self.entity_type_for(step);
        self.timeline.push((entity_type, result.clone()));
    }
}

pub struct PipelineRunner {
    runs: Arc<dyn RunStore>,
    entities: EntityStateStore,
    timeline: TimelineRecorder,
    coordinator: FanOutCoordinator,
    executor: Arc<dyn OperationExecutor>,
    max_fan_out_depth: i32,
}

impl PipelineRunner {
    pub fn new(
        runs: Arc<dyn RunStore>,
        entities: EntityStateStore,
        timeline: TimelineRecorder,
        executor: Arc<dyn OperationExecutor>,
        max_fan_out_depth: i32,
    ) -> Self {
        Self {
            coordinator: FanOutCoordinator::new(runs.clone()),
            runs,
            entities,
            timeline,
            executor,
            max_fan_out_depth,
        }
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    /// Execute a queued run.
    ///
    /// A run that is already terminal is reported as is; a run some other
    /// task is executing is reported as `running` and left alone.
    pub async fn execute(&self, run_id: Uuid) -> AppResult<RunOutcome> {
        let claimed = self
            .runs
            .transition_run(run_id, &[RunStatus::Queued], RunTransition::to(RunStatus::Running))
            .await?;

        let run = self
            .runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))?;

        if !claimed {
            debug!(run_id = %run_id, status = %run.status, "Run not claimable, skipping");
            let mut outcome = RunOutcome::new(run_id, run.status);
            if run.status == RunStatus::Succeeded {
                outcome.children = fanned_out_children(&run);
            }
            return Ok(outcome);
        }

        info!(
            run_id = %run.id,
            org_id = %run.org_id,
            depth = run.depth,
            start_position = run.start_position,
            "Run started"
        );
        let started = Instant::now();

        match self.drive(&run).await {
            Ok(outcome) => {
                info!(
                    run_id = %run.id,
                    status = %outcome.status,
                    children = outcome.children.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Run finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                let error = RunError::new(RunErrorCode::StoreUnavailable, e.to_string());
                let _ = self
                    .runs
                    .transition_run(
                        run.id,
                        &[RunStatus::Running],
                        RunTransition::to(RunStatus::Failed).with_error(error.to_value()),
                    )
                    .await
                    .log(format!("mark run {} failed after store error", run.id));
                Err(e)
            }
        }
    }

    async fn drive(&self, run: &PipelineRun) -> AppResult<RunOutcome> {
        let blueprint = match parse_blueprint(&run.blueprint_snapshot) {
            Ok(blueprint) => blueprint,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Run has an invalid blueprint");
                let error = RunError::new(RunErrorCode::BlueprintInvalid, e.to_string());
                return self.finish(run, RunStatus::Failed, Some(error), None).await;
            }
        };

        let prior = self.runs.list_step_results(run.id).await?;
        let mut exec = Execution {
            run,
            context: reconstruct_context(run, &prior),
            prior,
            entity_type: run.entity_type.as_deref().and_then(|t| t.parse().ok()),
            last_operation_id: None,
            timeline: Vec::new(),
            upserted: None,
        };

        let steps: Vec<&StepSpec> = blueprint.steps_from(run.start_position).collect();
        let outcome = self.walk(&mut exec, &steps).await;
        self.flush_timeline(&exec).await;
        outcome
    }

    async fn walk(&self, exec: &mut Execution<'_>, steps: &[&StepSpec]) -> AppResult<RunOutcome> {
        let run = exec.run;

        for (idx, step) in steps.iter().enumerate() {
            if self.is_canceled(run.id).await? {
                info!(run_id = %run.id, position = step.position, "Run canceled, stopping");
                self.skip_steps(exec, &steps[idx..], SkipReason::Canceled).await?;
                return Ok(RunOutcome::new(run.id, RunStatus::Canceled));
            }

            if !condition::evaluate(step.step_config.condition.as_ref(), &exec.context) {
                self.skip_step(exec, step, SkipReason::ConditionNotMet).await?;
                continue;
            }

            if let Some(gate) = &step.step_config.skip_if_fresh {
                if self.is_fresh(exec, step, gate).await? {
                    self.skip_step(exec, step, SkipReason::Fresh).await?;
                    continue;
                }
            }

            let (result, seeds, depth_exceeded) = self.run_step(exec, step).await?;

            if result.status == StepStatus::Succeeded {
                if let Some(Value::Object(output)) = &result.output {
                    exec.context = context::merge(&exec.context, &Value::Object(output.clone()));
                }
                if let Some(entity_type) = step.entity_type() {
                    exec.entity_type = Some(entity_type);
                }
                exec.last_operation_id = Some(step.operation_id.clone());
            }
            exec.note_terminal(step, &result);

            // A cancel that landed while the step was in flight.
            if self.is_canceled(run.id).await? {
                info!(run_id = %run.id, position = step.position, "Run canceled during step, stopping");
                self.skip_steps(exec, &steps[idx + 1..], SkipReason::Canceled).await?;
                return Ok(RunOutcome::new(run.id, RunStatus::Canceled));
            }

            if depth_exceeded {
                self.skip_steps(exec, &steps[idx + 1..], SkipReason::UpstreamFailed).await?;
                let error = RunError::new(
                    RunErrorCode::FanOutDepthExceeded,
                    format!("fan-out depth cap {} reached", self.max_fan_out_depth),
                )
                .at(step.position);
                return self.finish(run, RunStatus::Failed, Some(error), None).await;
            }

            if result.status == StepStatus::Failed && !step.step_config.continue_on_failure {
                self.skip_steps(exec, &steps[idx + 1..], SkipReason::UpstreamFailed).await?;
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("operation {} failed", step.operation_id));
                let error = RunError::new(RunErrorCode::StepFailed, message).at(step.position);
                return self.finish(run, RunStatus::Failed, Some(error), None).await;
            }

            match seeds.len() {
                0 => {}
                1 => {
                    exec.context = context::merge(&exec.context, &Value::Object(seeds[0].clone()));
                }
                _ => {
                    let children = self.hand_off(exec, step, &seeds).await?;
                    self.skip_steps(exec, &steps[idx + 1..], SkipReason::FannedOut).await?;
                    let result = json!({"fanned_out": children, "position": step.position});
                    let mut outcome = self.finish(run, RunStatus::Succeeded, None, Some(result)).await?;
                    if outcome.status == RunStatus::Succeeded {
                        outcome.children = children;
                    }
                    return Ok(outcome);
                }
            }
        }

        if self.is_canceled(run.id).await? {
            info!(run_id = %run.id, "Run canceled before entity upsert");
            return Ok(RunOutcome::new(run.id, RunStatus::Canceled));
        }
        let result = self.upsert_entity(exec).await?;
        self.finish(run, RunStatus::Succeeded, None, Some(result)).await
    }

    /// Execute one step through the bridge and persist its terminal result.
    /// Returns the result, any fan-out seeds, and whether the fan-out would
    /// exceed the depth cap.
    async fn run_step(
        &self,
        exec: &Execution<'_>,
        step: &StepSpec,
    ) -> AppResult<(StepResult, Vec<Map<String, Value>>, bool)> {
        let run = exec.run;
        let attempt = exec.attempt(step.position);
        let input = Value::Object(exec.context.clone());
        self.runs
            .insert_step_result(&NewStepResult::running(
                run.id,
                step.position,
                attempt,
                &step.operation_id,
                input,
            ))
            .await?;

        let request = OperationRequest {
            operation_id: step.operation_id.clone(),
            entity_type: exec.entity_type_for(step),
            input: exec.context.clone(),
            options: step.step_config.options.clone(),
        };

        let started = Instant::now();
        let response = match self.executor.execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    position = step.position,
                    operation_id = %step.operation_id,
                    error = %e,
                    "Operation call failed"
                );
                OperationResponse::failed(e.to_string())
            }
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        let (mut status, skip_reason) = response.status.step_status();
        let mut error = response.error.clone();

        let mut seeds = Vec::new();
        let mut depth_exceeded = false;
        if step.fan_out && status == StepStatus::Succeeded {
            if let Some(output) = &response.output {
                seeds = fan_out_seeds(output, step.fan_out_field());
            }
            if seeds.len() > 1 && run.depth >= self.max_fan_out_depth {
                status = StepStatus::Failed;
                error = Some(format!(
                    "fan-out of {} items at depth {} exceeds cap {}",
                    seeds.len(),
                    run.depth,
                    self.max_fan_out_depth
                ));
                depth_exceeded = true;
                seeds.clear();
            }
        }

        let completion = StepCompletion {
            status,
            skip_reason,
            output: response.output.map(Value::Object),
            provider_attempts: Value::Array(response.provider_attempts),
            error,
            completed_at: Utc::now(),
            duration_ms,
        };
        let result = self
            .runs
            .complete_step_result(run.id, step.position, attempt, &completion)
            .await?;

        debug!(
            run_id = %run.id,
            position = step.position,
            attempt,
            operation_id = %step.operation_id,
            status = %result.status,
            duration_ms,
            "Step finished"
        );

        Ok((result, seeds, depth_exceeded))
    }

    async fn is_fresh(&self, exec: &Execution<'_>, step: &StepSpec, gate: &SkipIfFresh) -> AppResult<bool> {
        let Some(entity_type) = exec.entity_type_for(step) else {
            return Ok(false);
        };

        let mut identity = Map::new();
        for field in &gate.identity_fields {
            match condition::resolve_path(&exec.context, field) {
                Some(value) => {
                    let key = field.rsplit('.').next().unwrap_or(field);
                    identity.insert(key.to_string(), value.clone());
                }
                None => return Ok(false),
            }
        }

        let freshness = self
            .entities
            .freshness(&exec.run.org_id, entity_type, &identity, gate.max_age_hours)
            .await?;
        Ok(freshness.fresh)
    }

    async fn is_canceled(&self, run_id: Uuid) -> AppResult<bool> {
        Ok(self
            .runs
            .get_run(run_id)
            .await?
            .is_some_and(|run| run.status == RunStatus::Canceled))
    }

    async fn skip_step(&self, exec: &mut Execution<'_>, step: &StepSpec, reason: SkipReason) -> AppResult<()> {
        let skipped = NewStepResult::skipped(
            exec.run.id,
            step.position,
            exec.attempt(step.position),
            &step.operation_id,
            reason,
            Some(Value::Object(exec.context.clone())),
        );
        let result = self.runs.insert_step_result(&skipped).await?;
        debug!(
            run_id = %exec.run.id,
            position = step.position,
            reason = %reason,
            "Step skipped"
        );
        exec.note_terminal(step, &result);
        Ok(())
    }

    async fn skip_steps(&self, exec: &mut Execution<'_>, steps: &[&StepSpec], reason: SkipReason) -> AppResult<()> {
        for step in steps {
            self.skip_step(exec, step, reason).await?;
        }
        Ok(())
    }

    /// Write one timeline event per buffered step result, filed under the
    /// entity the run upserted, or else the one its final context resolves
    /// to. Every step of an execution therefore lands on the same entity.
    async fn flush_timeline(&self, exec: &Execution<'_>) {
        for (step_type, result) in &exec.timeline {
            let Some(entity_type) = step_type.or(exec.entity_type) else {
                continue;
            };
            let entity = match exec.upserted {
                Some((upserted_type, entity_id)) if upserted_type == entity_type => Some(EntityRef {
                    org_id: exec.run.org_id.clone(),
                    entity_type,
                    entity_id,
                }),
                _ => EntityRef::from_context(&exec.run.org_id, entity_type, &exec.context),
            };
            match entity {
                Some(entity) => {
                    self.timeline.record(&entity, result).await;
                }
                None => debug!(
                    run_id = %exec.run.id,
                    position = result.position,
                    "No resolvable entity in context, timeline not recorded"
                ),
            }
        }
    }

    /// Fan out from `step`, reusing children a previous execution already
    /// created for the same continuation point.
    async fn hand_off(
        &self,
        exec: &Execution<'_>,
        step: &StepSpec,
        seeds: &[Map<String, Value>],
    ) -> AppResult<Vec<Uuid>> {
        let start_position = step.position + 1;
        let existing: Vec<Uuid> = self
            .runs
            .list_children(exec.run.id)
            .await?
            .into_iter()
            .filter(|child| child.start_position == start_position)
            .map(|child| child.id)
            .collect();

        if !existing.is_empty() {
            info!(
                run_id = %exec.run.id,
                start_position,
                children = existing.len(),
                "Reusing children from an earlier fan-out"
            );
            return Ok(existing);
        }

        // Children get the candidate list only as their own seed item.
        let mut parent_context = exec.context.clone();
        parent_context.remove(step.fan_out_field());

        self.coordinator
            .fan_out(exec.run, &parent_context, start_position, seeds)
            .await
    }

    async fn upsert_entity(&self, exec: &mut Execution<'_>) -> AppResult<Value> {
        let Some(entity_type) = exec.entity_type else {
            return Ok(json!({"entity": null}));
        };

        let request = UpsertRequest::new(exec.run.org_id.clone(), entity_type, exec.context.clone())
            .with_provenance(exec.last_operation_id.clone(), Some(exec.run.id));

        match self.entities.upsert(request).await {
            Ok(upserted) => {
                exec.upserted = Some((entity_type, upserted.entity_id));
                Ok(json!({
                    "entity_type": entity_type,
                    "entity": upserted,
                }))
            }
            Err(AppError::Validation(message)) => {
                warn!(run_id = %exec.run.id, error = %message, "Final context has no entity identity");
                Ok(json!({"entity_type": entity_type, "entity": null, "reason": message}))
            }
            Err(e) => Err(e),
        }
    }

    /// Move a running run to its terminal state. A concurrent cancel wins.
    async fn finish(
        &self,
        run: &PipelineRun,
        status: RunStatus,
        error: Option<RunError>,
        result: Option<Value>,
    ) -> AppResult<RunOutcome> {
        let mut transition = RunTransition::to(status);
        if let Some(error) = error {
            transition = transition.with_error(error.to_value());
        }
        if let Some(result) = result {
            transition = transition.with_result(result);
        }

        if self
            .runs
            .transition_run(run.id, &[RunStatus::Running], transition)
            .await?
        {
            return Ok(RunOutcome::new(run.id, status));
        }

        let current = self
            .runs
            .get_run(run.id)
            .await?
            .log_none(format!("run {} vanished before finishing", run.id))
            .map_or(RunStatus::Canceled, |r| r.status);
        info!(run_id = %run.id, status = %current, "Run changed state before it could finish");
        Ok(RunOutcome::new(run.id, current))
    }

    /// Cancel a run and every non-terminal descendant. Returns the ids that
    /// were canceled by this call.
    ///
    /// Queued runs get their pending steps written as `skipped: canceled`
    /// right away. Running runs notice at their next step boundary.
    pub async fn cancel(&self, run_id: Uuid) -> AppResult<Vec<Uuid>> {
        if self.runs.get_run(run_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Run {} not found", run_id)));
        }

        let mut canceled = Vec::new();
        let mut pending = vec![run_id];

        while let Some(id) = pending.pop() {
            let cancel = RunTransition::to(RunStatus::Canceled);
            if self
                .runs
                .transition_run(id, &[RunStatus::Queued], cancel.clone())
                .await?
            {
                self.skip_unstarted(id).await?;
                canceled.push(id);
            } else if self
                .runs
                .transition_run(id, &[RunStatus::Running], cancel)
                .await?
            {
                canceled.push(id);
            }

            // Terminal runs are walked too; a fanned-out parent is
            // succeeded while its children may still be live.
            pending.extend(self.runs.list_children(id).await?.into_iter().map(|c| c.id));
        }

        info!(run_id = %run_id, canceled = canceled.len(), "Run tree canceled");
        Ok(canceled)
    }

    /// Write `skipped: canceled` rows for a queued run that never started.
    async fn skip_unstarted(&self, run_id: Uuid) -> AppResult<()> {
        let Some(run) = self
            .runs
            .get_run(run_id)
            .await?
            .log_none(format!("canceled run {} vanished", run_id))
        else {
            return Ok(());
        };
        let Ok(blueprint) = parse_blueprint(&run.blueprint_snapshot) else {
            return Ok(());
        };

        let prior = self.runs.list_step_results(run_id).await?;
        for step in blueprint.steps_from(run.start_position) {
            let skipped = NewStepResult::skipped(
                run_id,
                step.position,
                next_attempt(&prior, step.position),
                &step.operation_id,
                SkipReason::Canceled,
                None,
            );
            match self.runs.insert_step_result(&skipped).await {
                Ok(_) | Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Children recorded in a fanned-out run's result.
fn fanned_out_children(run: &PipelineRun) -> Vec<Uuid> {
    run.result
        .as_ref()
        .and_then(|r| r.get("fanned_out"))
        .and_then(|ids| serde_json::from_value(ids.clone()).ok())
        .unwrap_or_default()
}
