//! Step result queries.

use uuid::Uuid;

use crate::db::models::{NewStepResult, StepCompletion, StepResult};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

const STEP_COLUMNS: &str = r#"
    id, run_id, position, attempt, operation_id, status, skip_reason,
    input, output, provider_attempts, error, started_at, completed_at, duration_ms
"#;

/// Insert a step result. A duplicate (run, position, attempt) is a conflict.
pub async fn insert_step_result(pool: &DbPool, step: &NewStepResult) -> AppResult<StepResult> {
    let sql = format!(
        r#"
        INSERT INTO pipeline.step_result (
            run_id, position, attempt, operation_id, status, skip_reason,
            input, started_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (run_id, position, attempt) DO NOTHING
        RETURNING {}
        "#,
        STEP_COLUMNS
    );

    sqlx::query_as::<_, StepResult>(&sql)
        .bind(step.run_id)
        .bind(step.position)
        .bind(step.attempt)
        .bind(&step.operation_id)
        .bind(step.status.as_str())
        .bind(step.skip_reason.map(|r| r.as_str()))
        .bind(&step.input)
        .bind(step.started_at)
        .bind(step.completed_at)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Step result exists for run {} position {} attempt {}",
                step.run_id, step.position, step.attempt
            ))
        })
}

pub async fn complete_step_result(
    pool: &DbPool,
    run_id: Uuid,
    position: i32,
    attempt: i32,
    completion: &StepCompletion,
) -> AppResult<StepResult> {
    let sql = format!(
        r#"
        UPDATE pipeline.step_result
        SET status = $4, skip_reason = $5, output = $6, provider_attempts = $7,
            error = $8, completed_at = $9, duration_ms = $10
        WHERE run_id = $1 AND position = $2 AND attempt = $3
        RETURNING {}
        "#,
        STEP_COLUMNS
    );

    sqlx::query_as::<_, StepResult>(&sql)
        .bind(run_id)
        .bind(position)
        .bind(attempt)
        .bind(completion.status.as_str())
        .bind(completion.skip_reason.map(|r| r.as_str()))
        .bind(&completion.output)
        .bind(&completion.provider_attempts)
        .bind(&completion.error)
        .bind(completion.completed_at)
        .bind(completion.duration_ms)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Step result for run {} position {} attempt {}",
                run_id, position, attempt
            ))
        })
}

pub async fn list_step_results(pool: &DbPool, run_id: Uuid) -> AppResult<Vec<StepResult>> {
    let sql = format!(
        "SELECT {} FROM pipeline.step_result WHERE run_id = $1 ORDER BY position, attempt",
        STEP_COLUMNS
    );
    let steps = sqlx::query_as::<_, StepResult>(&sql)
        .bind(run_id)
        .fetch_all(pool)
        .await?;
    Ok(steps)
}
