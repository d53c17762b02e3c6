//! Embedded schema migrations, applied in order at startup.

use crate::db::DbPool;
use crate::error::AppResult;

/// A versioned SQL migration.
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, ascending by version.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Runs and step results",
            sql: r#"
CREATE TABLE IF NOT EXISTS pipeline.pipeline_run (
    id                 UUID PRIMARY KEY,
    org_id             TEXT NOT NULL,
    parent_run_id      UUID REFERENCES pipeline.pipeline_run(id),
    root_run_id        UUID NOT NULL,
    depth              INTEGER NOT NULL DEFAULT 0,
    entity_type        TEXT,
    blueprint_snapshot JSONB NOT NULL,
    initial_context    JSONB NOT NULL DEFAULT '{}'::jsonb,
    status             TEXT NOT NULL,
    start_position     INTEGER NOT NULL,
    error              JSONB,
    result             JSONB,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at         TIMESTAMPTZ,
    completed_at       TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_pipeline_run_parent ON pipeline.pipeline_run(parent_run_id);
CREATE INDEX IF NOT EXISTS idx_pipeline_run_status ON pipeline.pipeline_run(status);
CREATE INDEX IF NOT EXISTS idx_pipeline_run_root ON pipeline.pipeline_run(root_run_id);

CREATE TABLE IF NOT EXISTS pipeline.step_result (
    id                BIGSERIAL PRIMARY KEY,
    run_id            UUID NOT NULL REFERENCES pipeline.pipeline_run(id) ON DELETE CASCADE,
    position          INTEGER NOT NULL,
    attempt           INTEGER NOT NULL,
    operation_id      TEXT NOT NULL,
    status            TEXT NOT NULL,
    skip_reason       TEXT,
    input             JSONB,
    output            JSONB,
    provider_attempts JSONB NOT NULL DEFAULT '[]'::jsonb,
    error             TEXT,
    started_at        TIMESTAMPTZ,
    completed_at      TIMESTAMPTZ,
    duration_ms       BIGINT,
    UNIQUE (run_id, position, attempt)
);
"#,
        },
        Migration {
            version: 2,
            description: "Canonical entities, snapshots and timelines",
            sql: r#"
CREATE TABLE IF NOT EXISTS pipeline.canonical_entity (
    org_id            TEXT NOT NULL,
    entity_id         UUID NOT NULL,
    entity_type       TEXT NOT NULL,
    natural_key       TEXT NOT NULL,
    record_version    BIGINT NOT NULL,
    canonical_payload JSONB NOT NULL,
    last_operation_id TEXT,
    last_run_id       UUID,
    last_enriched_at  TIMESTAMPTZ NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (org_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_canonical_entity_type ON pipeline.canonical_entity(org_id, entity_type);

CREATE TABLE IF NOT EXISTS pipeline.entity_snapshot (
    id                BIGSERIAL PRIMARY KEY,
    org_id            TEXT NOT NULL,
    entity_type       TEXT NOT NULL,
    entity_id         UUID NOT NULL,
    record_version    BIGINT NOT NULL,
    canonical_payload JSONB NOT NULL,
    last_operation_id TEXT,
    last_run_id       UUID,
    captured_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (org_id, entity_type, entity_id, record_version)
);

CREATE TABLE IF NOT EXISTS pipeline.timeline_event (
    id           BIGSERIAL PRIMARY KEY,
    org_id       TEXT NOT NULL,
    entity_type  TEXT NOT NULL,
    entity_id    UUID NOT NULL,
    run_id       UUID NOT NULL,
    position     INTEGER NOT NULL,
    attempt      INTEGER NOT NULL,
    operation_id TEXT NOT NULL,
    status       TEXT NOT NULL,
    skip_reason  TEXT,
    detail       JSONB,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_timeline_event_entity ON pipeline.timeline_event(org_id, entity_id, id);
"#,
        },
    ]
}

/// Create the `pipeline` schema if needed and apply pending migrations,
/// each in its own transaction.
pub async fn run_migrations(pool: &DbPool) -> AppResult<usize> {
    sqlx::raw_sql(
        r#"
        CREATE SCHEMA IF NOT EXISTS pipeline;
        CREATE TABLE IF NOT EXISTS pipeline.schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Vec<(i32,)> = sqlx::query_as("SELECT version FROM pipeline.schema_migrations")
        .fetch_all(pool)
        .await?;
    let applied: Vec<i32> = applied.into_iter().map(|(v,)| v).collect();

    let mut count = 0;
    for migration in all_migrations() {
        if applied.contains(&migration.version) {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO pipeline.schema_migrations (version, description) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_strictly_increase() {
        let versions: Vec<i32> = all_migrations().iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.first(), Some(&1));
    }

    #[test]
    fn test_migrations_declare_unique_keys() {
        let sql: String = all_migrations().iter().map(|m| m.sql).collect();
        assert!(sql.contains("UNIQUE (run_id, position, attempt)"));
        assert!(sql.contains("PRIMARY KEY (org_id, entity_id)"));
        assert!(sql.contains("UNIQUE (org_id, entity_type, entity_id, record_version)"));
    }
}
