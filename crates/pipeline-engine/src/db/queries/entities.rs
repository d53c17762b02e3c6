//! Canonical entity and snapshot queries.
//!
//! Writes are optimistic: inserts use `ON CONFLICT DO NOTHING` and updates
//! are conditional on the previously read `record_version`.

use uuid::Uuid;

use crate::db::models::{EntityRecord, EntitySnapshot};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

const ENTITY_COLUMNS: &str = r#"
    org_id, entity_type, entity_id, natural_key, record_version, canonical_payload,
    last_operation_id, last_run_id, last_enriched_at, created_at, updated_at
"#;

const SNAPSHOT_COLUMNS: &str = r#"
    id, org_id, entity_type, entity_id, record_version, canonical_payload,
    last_operation_id, last_run_id, captured_at
"#;

pub async fn get_entity(pool: &DbPool, org_id: &str, entity_id: Uuid) -> AppResult<Option<EntityRecord>> {
    let sql = format!(
        "SELECT {} FROM pipeline.canonical_entity WHERE org_id = $1 AND entity_id = $2",
        ENTITY_COLUMNS
    );
    let record = sqlx::query_as::<_, EntityRecord>(&sql)
        .bind(org_id)
        .bind(entity_id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Returns `false` when (org, entity_id) already exists.
pub async fn insert_entity(pool: &DbPool, record: &EntityRecord) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO pipeline.canonical_entity (
            org_id, entity_type, entity_id, natural_key, record_version, canonical_payload,
            last_operation_id, last_run_id, last_enriched_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (org_id, entity_id) DO NOTHING
        "#,
    )
    .bind(&record.org_id)
    .bind(&record.entity_type)
    .bind(record.entity_id)
    .bind(&record.natural_key)
    .bind(record.record_version)
    .bind(&record.canonical_payload)
    .bind(&record.last_operation_id)
    .bind(record.last_run_id)
    .bind(record.last_enriched_at)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Returns `false` when the stored version is no longer `expected_version`.
pub async fn update_entity(pool: &DbPool, record: &EntityRecord, expected_version: i64) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline.canonical_entity
        SET record_version = $3, canonical_payload = $4, natural_key = $5,
            last_operation_id = $6, last_run_id = $7, last_enriched_at = $8, updated_at = $9
        WHERE org_id = $1 AND entity_id = $2 AND record_version = $10
        "#,
    )
    .bind(&record.org_id)
    .bind(record.entity_id)
    .bind(record.record_version)
    .bind(&record.canonical_payload)
    .bind(&record.natural_key)
    .bind(&record.last_operation_id)
    .bind(record.last_run_id)
    .bind(record.last_enriched_at)
    .bind(record.updated_at)
    .bind(expected_version)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn insert_snapshot(pool: &DbPool, snapshot: &EntitySnapshot) -> AppResult<EntitySnapshot> {
    let sql = format!(
        r#"
        INSERT INTO pipeline.entity_snapshot (
            org_id, entity_type, entity_id, record_version, canonical_payload,
            last_operation_id, last_run_id, captured_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (org_id, entity_type, entity_id, record_version) DO NOTHING
        RETURNING {}
        "#,
        SNAPSHOT_COLUMNS
    );

    sqlx::query_as::<_, EntitySnapshot>(&sql)
        .bind(&snapshot.org_id)
        .bind(&snapshot.entity_type)
        .bind(snapshot.entity_id)
        .bind(snapshot.record_version)
        .bind(&snapshot.canonical_payload)
        .bind(&snapshot.last_operation_id)
        .bind(snapshot.last_run_id)
        .bind(snapshot.captured_at)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Snapshot exists for entity {} version {}",
                snapshot.entity_id, snapshot.record_version
            ))
        })
}

pub async fn list_snapshots(pool: &DbPool, org_id: &str, entity_id: Uuid) -> AppResult<Vec<EntitySnapshot>> {
    let sql = format!(
        r#"
        SELECT {} FROM pipeline.entity_snapshot
        WHERE org_id = $1 AND entity_id = $2
        ORDER BY record_version
        "#,
        SNAPSHOT_COLUMNS
    );
    let snapshots = sqlx::query_as::<_, EntitySnapshot>(&sql)
        .bind(org_id)
        .bind(entity_id)
        .fetch_all(pool)
        .await?;
    Ok(snapshots)
}
