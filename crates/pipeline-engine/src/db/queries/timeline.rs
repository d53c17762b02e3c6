//! Timeline event queries.

use uuid::Uuid;

use crate::db::models::{NewTimelineEvent, TimelineEvent};
use crate::db::DbPool;
use crate::error::AppResult;

const EVENT_COLUMNS: &str = r#"
    id, org_id, entity_type, entity_id, run_id, position, attempt,
    operation_id, status, skip_reason, detail, created_at
"#;

pub async fn append_event(pool: &DbPool, event: &NewTimelineEvent) -> AppResult<TimelineEvent> {
    let sql = format!(
        r#"
        INSERT INTO pipeline.timeline_event (
            org_id, entity_type, entity_id, run_id, position, attempt,
            operation_id, status, skip_reason, detail
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        EVENT_COLUMNS
    );

    let stored = sqlx::query_as::<_, TimelineEvent>(&sql)
        .bind(&event.org_id)
        .bind(&event.entity_type)
        .bind(event.entity_id)
        .bind(event.run_id)
        .bind(event.position)
        .bind(event.attempt)
        .bind(&event.operation_id)
        .bind(&event.status)
        .bind(&event.skip_reason)
        .bind(&event.detail)
        .fetch_one(pool)
        .await?;

    Ok(stored)
}

pub async fn list_events(pool: &DbPool, org_id: &str, entity_id: Uuid) -> AppResult<Vec<TimelineEvent>> {
    let sql = format!(
        "SELECT {} FROM pipeline.timeline_event WHERE org_id = $1 AND entity_id = $2 ORDER BY id",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, TimelineEvent>(&sql)
        .bind(org_id)
        .bind(entity_id)
        .fetch_all(pool)
        .await?;
    Ok(events)
}
