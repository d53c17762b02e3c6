//! Run API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::db::models::{PipelineRun, StepResult};
use crate::error::AppError;
use crate::services::run::{CancelRunResponse, SubmitRunRequest};
use crate::services::RunService;

/// Submit a run.
///
/// `POST /api/runs`
///
/// Responds `202 Accepted` with the queued run; execution continues in the
/// background.
pub async fn submit(
    State(service): State<RunService>,
    Json(request): Json<SubmitRunRequest>,
) -> Result<(StatusCode, Json<PipelineRun>), AppError> {
    let run = service.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// `GET /api/runs/{run_id}`
pub async fn get(
    State(service): State<RunService>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<PipelineRun>, AppError> {
    Ok(Json(service.get(run_id).await?))
}

/// Step results ordered by position, then attempt.
///
/// `GET /api/runs/{run_id}/steps`
pub async fn steps(
    State(service): State<RunService>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Vec<StepResult>>, AppError> {
    Ok(Json(service.steps(run_id).await?))
}

/// `GET /api/runs/{run_id}/children`
pub async fn children(
    State(service): State<RunService>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Vec<PipelineRun>>, AppError> {
    Ok(Json(service.children(run_id).await?))
}

/// Cancel a run and its non-terminal descendants.
///
/// `POST /api/runs/{run_id}/cancel`
pub async fn cancel(
    State(service): State<RunService>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<CancelRunResponse>, AppError> {
    Ok(Json(service.cancel(run_id).await?))
}
