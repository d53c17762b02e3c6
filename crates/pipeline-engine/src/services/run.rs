//! Run submission, inspection and cancellation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::blueprint::{validate_blueprint, BlueprintSnapshot, StepSpec};
use crate::db::models::{NewRun, PipelineRun, StepResult};
use crate::engine::RunDispatcher;
use crate::entity::EntityType;
use crate::error::{AppError, AppResult};

/// Request to start a root run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRunRequest {
    pub org_id: String,
    pub steps: Vec<StepSpec>,

    #[serde(default)]
    pub seed_context: Map<String, Value>,

    /// Entity type for the final upsert. Derived from the operation
    /// namespaces when omitted.
    #[serde(default)]
    pub entity_type: Option<EntityType>,

    /// Defaults to the first step's position.
    #[serde(default)]
    pub start_position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub canceled: Vec<Uuid>,
}

#[derive(Clone)]
pub struct RunService {
    dispatcher: RunDispatcher,
}

impl RunService {
    pub fn new(dispatcher: RunDispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &RunDispatcher {
        &self.dispatcher
    }

    /// Snapshot the blueprint, persist a queued run and start it.
    pub async fn submit(&self, request: SubmitRunRequest) -> AppResult<PipelineRun> {
        if request.org_id.trim().is_empty() {
            return Err(AppError::BadRequest("org_id is required".to_string()));
        }

        let snapshot = BlueprintSnapshot { steps: request.steps };
        validate_blueprint(&snapshot)?;

        let start_position = match request.start_position {
            Some(position) => position,
            None => snapshot
                .first_position()
                .ok_or_else(|| AppError::Validation("Blueprint has no steps".to_string()))?,
        };

        let run = NewRun::root(
            &request.org_id,
            request.entity_type.map(|t| t.as_str().to_string()),
            serde_json::to_value(&snapshot)?,
            Value::Object(request.seed_context),
            start_position,
        );
        self.dispatcher.submit(run).await
    }

    pub async fn get(&self, run_id: Uuid) -> AppResult<PipelineRun> {
        self.dispatcher
            .runner()
            .runs()
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))
    }

    pub async fn steps(&self, run_id: Uuid) -> AppResult<Vec<StepResult>> {
        self.get(run_id).await?;
        self.dispatcher.runner().runs().list_step_results(run_id).await
    }

    pub async fn children(&self, run_id: Uuid) -> AppResult<Vec<PipelineRun>> {
        self.get(run_id).await?;
        self.dispatcher.runner().runs().list_children(run_id).await
    }

    pub async fn cancel(&self, run_id: Uuid) -> AppResult<CancelRunResponse> {
        let canceled = self.dispatcher.runner().cancel(run_id).await?;
        Ok(CancelRunResponse { run_id, canceled })
    }
}
