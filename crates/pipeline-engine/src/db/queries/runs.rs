//! Pipeline run queries.

use uuid::Uuid;

use crate::db::models::{NewRun, PipelineRun, RunTransition};
use crate::db::DbPool;
use crate::engine::state::RunStatus;
use crate::error::AppResult;

const RUN_COLUMNS: &str = r#"
    id, org_id, parent_run_id, root_run_id, depth, entity_type,
    blueprint_snapshot, initial_context, status, start_position,
    error, result, created_at, started_at, completed_at
"#;

/// Insert a queued run.
pub async fn insert_run(pool: &DbPool, run: &NewRun) -> AppResult<PipelineRun> {
    let sql = format!(
        r#"
        INSERT INTO pipeline.pipeline_run (
            id, org_id, parent_run_id, root_run_id, depth, entity_type,
            blueprint_snapshot, initial_context, status, start_position
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        RUN_COLUMNS
    );

    let record = sqlx::query_as::<_, PipelineRun>(&sql)
        .bind(run.id)
        .bind(&run.org_id)
        .bind(run.parent_run_id)
        .bind(run.root_run_id)
        .bind(run.depth)
        .bind(&run.entity_type)
        .bind(&run.blueprint_snapshot)
        .bind(&run.initial_context)
        .bind(RunStatus::Queued.as_str())
        .bind(run.start_position)
        .fetch_one(pool)
        .await?;

    Ok(record)
}

pub async fn get_run(pool: &DbPool, run_id: Uuid) -> AppResult<Option<PipelineRun>> {
    let sql = format!("SELECT {} FROM pipeline.pipeline_run WHERE id = $1", RUN_COLUMNS);
    let run = sqlx::query_as::<_, PipelineRun>(&sql)
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    Ok(run)
}

/// Compare-and-set status update. Returns whether a row changed.
pub async fn transition_run(
    pool: &DbPool,
    run_id: Uuid,
    expected: &[RunStatus],
    transition: &RunTransition,
) -> AppResult<bool> {
    let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

    let result = sqlx::query(
        r#"
        UPDATE pipeline.pipeline_run
        SET status = $2,
            started_at = CASE WHEN $2 = 'running' THEN COALESCE(started_at, now()) ELSE started_at END,
            completed_at = CASE WHEN $3 THEN now() ELSE completed_at END,
            error = COALESCE($4, error),
            result = COALESCE($5, result)
        WHERE id = $1 AND status = ANY($6)
        "#,
    )
    .bind(run_id)
    .bind(transition.to.as_str())
    .bind(transition.to.is_terminal())
    .bind(&transition.error)
    .bind(&transition.result)
    .bind(&expected)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_children(pool: &DbPool, parent_run_id: Uuid) -> AppResult<Vec<PipelineRun>> {
    let sql = format!(
        "SELECT {} FROM pipeline.pipeline_run WHERE parent_run_id = $1 ORDER BY created_at, id",
        RUN_COLUMNS
    );
    let runs = sqlx::query_as::<_, PipelineRun>(&sql)
        .bind(parent_run_id)
        .fetch_all(pool)
        .await?;
    Ok(runs)
}

pub async fn list_runs_by_status(pool: &DbPool, status: RunStatus) -> AppResult<Vec<PipelineRun>> {
    let sql = format!(
        "SELECT {} FROM pipeline.pipeline_run WHERE status = $1 ORDER BY created_at",
        RUN_COLUMNS
    );
    let runs = sqlx::query_as::<_, PipelineRun>(&sql)
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    Ok(runs)
}
