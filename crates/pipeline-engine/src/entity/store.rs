//! Versioned, additive-merge entity upserts and freshness lookups.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::identity::{self, Identity};
use super::schema;
use super::types::{EntityType, Freshness, UpsertOutcome, UpsertRequest, UpsertResult};
use crate::db::models::{EntityRecord, EntitySnapshot};
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::store::EntityRepository;

/// Entity State Store.
///
/// Concurrent writers to the same (org, entity) are serialised by the
/// repository's compare-and-set on `record_version`, not by locks. The
/// slower writer loses and gets [`UpsertOutcome::Stale`].
#[derive(Clone)]
pub struct EntityStateStore {
    repo: Arc<dyn EntityRepository>,
}

impl EntityStateStore {
    pub fn new(repo: Arc<dyn EntityRepository>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, org_id: &str, entity_id: Uuid) -> AppResult<Option<EntityRecord>> {
        self.repo.get_entity(org_id, entity_id).await
    }

    pub async fn snapshots(&self, org_id: &str, entity_id: Uuid) -> AppResult<Vec<EntitySnapshot>> {
        self.repo.list_snapshots(org_id, entity_id).await
    }

    /// Validate, resolve identity, snapshot and merge.
    pub async fn upsert(&self, request: UpsertRequest) -> AppResult<UpsertResult> {
        let validated = schema::validate(request.entity_type, &request.fields);
        if !validated.rejected.is_empty() {
            tracing::warn!(
                org_id = %request.org_id,
                entity_type = %request.entity_type,
                rejected = ?validated.rejected,
                "Dropping canonical fields that failed schema validation"
            );
        }

        let identity = resolve(&request, &validated.fields)?;
        let existing = self.repo.get_entity(&request.org_id, identity.entity_id).await?;
        if let Some(stored) = &existing {
            if stored.entity_type != request.entity_type.as_str() {
                return Err(AppError::Conflict(format!(
                    "Entity {} is a {}, not a {}",
                    stored.entity_id, stored.entity_type, request.entity_type
                )));
            }
        }

        match existing {
            Some(stored) => self.update(request, validated, stored).await,
            None => self.create(request, validated, identity).await,
        }
    }

    async fn create(
        &self,
        request: UpsertRequest,
        validated: schema::Validated,
        identity: Identity,
    ) -> AppResult<UpsertResult> {
        let now = Utc::now();
        let record = EntityRecord {
            org_id: request.org_id.clone(),
            entity_type: request.entity_type.as_str().to_string(),
            entity_id: identity.entity_id,
            natural_key: identity.natural_key,
            record_version: 1,
            canonical_payload: Value::Object(validated.fields),
            last_operation_id: request.operation_id.clone(),
            last_run_id: request.run_id,
            last_enriched_at: now,
            created_at: now,
            updated_at: now,
        };

        if self.repo.insert_entity(&record).await? {
            tracing::info!(
                org_id = %record.org_id,
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                "Canonical entity created"
            );
            return Ok(UpsertResult {
                entity_id: record.entity_id,
                record_version: 1,
                created: true,
                outcome: UpsertOutcome::Created,
                rejected_fields: validated.rejected,
            });
        }

        // Another writer created it first.
        let current = self.repo.get_entity(&request.org_id, record.entity_id).await?;
        Ok(self.stale(&request, record.entity_id, current, validated.rejected))
    }

    async fn update(
        &self,
        request: UpsertRequest,
        validated: schema::Validated,
        stored: EntityRecord,
    ) -> AppResult<UpsertResult> {
        if let Some(incoming) = request.incoming_version {
            if incoming <= stored.record_version {
                let entity_id = stored.entity_id;
                return Ok(self.stale(&request, entity_id, Some(stored), validated.rejected));
            }
        }

        // History first; a lost snapshot never blocks the write.
        let _ = self
            .repo
            .insert_snapshot(&EntitySnapshot::capture(&stored))
            .await
            .log(format!("snapshot entity {} version {}", stored.entity_id, stored.record_version));

        let mut payload = match &stored.canonical_payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in validated.fields {
            payload.insert(key, value);
        }

        let now = Utc::now();
        let expected_version = stored.record_version;
        let record = EntityRecord {
            record_version: expected_version + 1,
            canonical_payload: Value::Object(payload),
            last_operation_id: request.operation_id.clone().or(stored.last_operation_id.clone()),
            last_run_id: request.run_id.or(stored.last_run_id),
            last_enriched_at: now,
            updated_at: now,
            ..stored
        };

        if !self.repo.update_entity(&record, expected_version).await? {
            let current = self.repo.get_entity(&request.org_id, record.entity_id).await?;
            return Ok(self.stale(&request, record.entity_id, current, validated.rejected));
        }

        tracing::info!(
            org_id = %record.org_id,
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            record_version = record.record_version,
            "Canonical entity updated"
        );

        Ok(UpsertResult {
            entity_id: record.entity_id,
            record_version: record.record_version,
            created: false,
            outcome: UpsertOutcome::Updated,
            rejected_fields: validated.rejected,
        })
    }

    fn stale(
        &self,
        request: &UpsertRequest,
        entity_id: Uuid,
        current: Option<EntityRecord>,
        rejected_fields: Vec<String>,
    ) -> UpsertResult {
        let record_version = current.map_or(0, |c| c.record_version);
        tracing::info!(
            org_id = %request.org_id,
            entity_id = %entity_id,
            incoming_version = ?request.incoming_version,
            stored_version = record_version,
            "Stale entity write rejected"
        );
        UpsertResult {
            entity_id,
            record_version,
            created: false,
            outcome: UpsertOutcome::Stale,
            rejected_fields,
        }
    }

    /// Whether an entity matching `identity_fields` was enriched within the
    /// last `max_age_hours`. Never writes.
    pub async fn freshness(
        &self,
        org_id: &str,
        entity_type: EntityType,
        identity_fields: &Map<String, Value>,
        max_age_hours: i64,
    ) -> AppResult<Freshness> {
        self.freshness_at(org_id, entity_type, identity_fields, max_age_hours, Utc::now())
            .await
    }

    pub(crate) async fn freshness_at(
        &self,
        org_id: &str,
        entity_type: EntityType,
        identity_fields: &Map<String, Value>,
        max_age_hours: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Freshness> {
        if identity_fields.is_empty() || identity_fields.values().any(Value::is_null) {
            return Ok(Freshness::stale(None));
        }

        let validated = schema::validate(entity_type, identity_fields);
        if !validated.rejected.is_empty() {
            return Ok(Freshness::stale(None));
        }
        let Some(identity) = identity::resolve_natural(entity_type, &validated.fields) else {
            return Ok(Freshness::stale(None));
        };

        let Some(record) = self.repo.get_entity(org_id, identity.entity_id).await? else {
            return Ok(Freshness::stale(Some(identity.entity_id)));
        };

        // A window reaching past the representable range covers all time.
        let fresh = max_age_hours > 0
            && Duration::try_hours(max_age_hours)
                .and_then(|window| now.checked_sub_signed(window))
                .map_or(true, |cutoff| record.last_enriched_at >= cutoff);
        Ok(Freshness {
            fresh,
            entity_id: Some(record.entity_id),
            last_enriched_at: Some(record.last_enriched_at),
        })
    }
}

fn resolve(request: &UpsertRequest, fields: &Map<String, Value>) -> AppResult<Identity> {
    let resolved = identity::resolve_identity(request.entity_type, fields);
    match (request.entity_id, resolved) {
        (Some(entity_id), resolved) => Ok(Identity {
            entity_id,
            natural_key: resolved
                .map(|i| i.natural_key)
                .unwrap_or_else(|| format!("entity_id:{}", entity_id)),
        }),
        (None, Some(identity)) => Ok(identity),
        (None, None) => Err(AppError::Validation(format!(
            "No identity could be resolved for {} entity",
            request.entity_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn store() -> (EntityStateStore, Arc<InMemoryStore>) {
        let repo = Arc::new(InMemoryStore::new());
        (EntityStateStore::new(repo.clone()), repo)
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_additive_merge_preserves_known_fields() {
        let (entities, _) = store();
        let first = entities
            .upsert(UpsertRequest::new(
                "O",
                EntityType::Company,
                fields(json!({"domain": "acme.com", "employees": 50})),
            ))
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.record_version, 1);

        let second = entities
            .upsert(UpsertRequest::new(
                "O",
                EntityType::Company,
                fields(json!({"domain": "acme.com", "employees": null, "industry": "saas"})),
            ))
            .await
            .unwrap();
        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(second.outcome, UpsertOutcome::Updated);
        assert_eq!(second.record_version, 2);

        let record = entities.get("O", first.entity_id).await.unwrap().unwrap();
        assert_eq!(record.canonical_payload["employees"], json!(50));
        assert_eq!(record.canonical_payload["industry"], json!("saas"));
        assert_eq!(record.canonical_payload["domain"], json!("acme.com"));
    }

    #[tokio::test]
    async fn test_stale_version_leaves_row_unchanged() {
        let (entities, _) = store();
        let request = UpsertRequest::new(
            "O",
            EntityType::Company,
            fields(json!({"domain": "acme.com", "employees": 50})),
        );
        let created = entities.upsert(request.clone()).await.unwrap();

        for version in [0, 1] {
            let result = entities
                .upsert(request.clone().with_version(version))
                .await
                .unwrap();
            assert_eq!(result.outcome, UpsertOutcome::Stale);
            assert_eq!(result.record_version, 1);
        }

        let record = entities.get("O", created.entity_id).await.unwrap().unwrap();
        assert_eq!(record.record_version, 1);
        assert_eq!(record.canonical_payload, json!({"domain": "acme.com", "employees": 50}));
        assert!(entities.snapshots("O", created.entity_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_versions_increase_with_one_snapshot_each() {
        let (entities, _) = store();
        let mut entity_id = None;
        for employees in [10, 20, 30] {
            let result = entities
                .upsert(UpsertRequest::new(
                    "O",
                    EntityType::Company,
                    fields(json!({"domain": "acme.com", "employees": employees})),
                ))
                .await
                .unwrap();
            entity_id = Some(result.entity_id);
        }
        let entity_id = entity_id.unwrap();

        let record = entities.get("O", entity_id).await.unwrap().unwrap();
        assert_eq!(record.record_version, 3);

        let snapshots = entities.snapshots("O", entity_id).await.unwrap();
        let versions: Vec<i64> = snapshots.iter().map(|s| s.record_version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(snapshots[0].canonical_payload["employees"], json!(10));
        assert_eq!(snapshots[1].canonical_payload["employees"], json!(20));
    }

    #[tokio::test]
    async fn test_orgs_are_isolated() {
        let (entities, _) = store();
        let payload = fields(json!({"domain": "acme.com"}));
        let a = entities
            .upsert(UpsertRequest::new("A", EntityType::Company, payload.clone()))
            .await
            .unwrap();
        let b = entities
            .upsert(UpsertRequest::new("B", EntityType::Company, payload))
            .await
            .unwrap();
        assert!(a.created && b.created);
        assert_eq!(a.entity_id, b.entity_id);
    }

    #[tokio::test]
    async fn test_explicit_entity_id_wins() {
        let (entities, _) = store();
        let explicit = Uuid::new_v4();
        let mut request = UpsertRequest::new("O", EntityType::Person, fields(json!({"email": "jane@acme.com"})));
        request.entity_id = Some(explicit);

        let result = entities.upsert(request).await.unwrap();
        assert_eq!(result.entity_id, explicit);
    }

    #[tokio::test]
    async fn test_explicit_entity_id_of_another_type_conflicts() {
        let (entities, repo) = store();
        let company = entities
            .upsert(UpsertRequest::new("O", EntityType::Company, fields(json!({"domain": "acme.com"}))))
            .await
            .unwrap();

        let mut request = UpsertRequest::new("O", EntityType::Person, fields(json!({"email": "jane@acme.com"})));
        request.entity_id = Some(company.entity_id);
        let err = entities.upsert(request).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = repo.get_entity("O", company.entity_id).await.unwrap().unwrap();
        assert_eq!(stored.entity_type, "company");
        assert_eq!(stored.record_version, company.record_version);
        assert!(stored.canonical_payload.get("email").is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_identity_is_rejected() {
        let (entities, _) = store();
        let err = entities
            .upsert(UpsertRequest::new("O", EntityType::Company, fields(json!({"unknown": 1}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lost_race_on_update_is_stale() {
        let (entities, repo) = store();
        let created = entities
            .upsert(UpsertRequest::new("O", EntityType::Company, fields(json!({"domain": "acme.com"}))))
            .await
            .unwrap();

        // A competing writer bumps the version between our read and write.
        let mut competing = repo.get_entity("O", created.entity_id).await.unwrap().unwrap();
        competing.record_version = 2;
        assert!(repo.update_entity(&competing, 1).await.unwrap());

        let stored = repo.get_entity("O", created.entity_id).await.unwrap().unwrap();
        let mut stale_view = stored.clone();
        stale_view.record_version = 1;
        let result = entities
            .update(
                UpsertRequest::new("O", EntityType::Company, fields(json!({"domain": "acme.com"}))),
                schema::validate(EntityType::Company, &fields(json!({"name": "Acme"}))),
                stale_view,
            )
            .await
            .unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Stale);
        assert_eq!(result.record_version, 2);
    }

    async fn seed_enriched_at(repo: &InMemoryStore, hours_ago: i64) -> Uuid {
        let identity = identity::resolve_identity(
            EntityType::Company,
            &fields(json!({"domain": "acme.com"})),
        )
        .unwrap();
        let at = Utc::now() - Duration::hours(hours_ago);
        let record = EntityRecord {
            org_id: "O".to_string(),
            entity_type: "company".to_string(),
            entity_id: identity.entity_id,
            natural_key: identity.natural_key,
            record_version: 1,
            canonical_payload: json!({"domain": "acme.com"}),
            last_operation_id: None,
            last_run_id: None,
            last_enriched_at: at,
            created_at: at,
            updated_at: at,
        };
        assert!(repo.insert_entity(&record).await.unwrap());
        record.entity_id
    }

    #[tokio::test]
    async fn test_freshness_within_window() {
        let (entities, repo) = store();
        let entity_id = seed_enriched_at(&repo, 1).await;

        let freshness = entities
            .freshness("O", EntityType::Company, &fields(json!({"domain": "acme.com"})), 24)
            .await
            .unwrap();
        assert!(freshness.fresh);
        assert_eq!(freshness.entity_id, Some(entity_id));
    }

    #[tokio::test]
    async fn test_freshness_outside_window() {
        let (entities, repo) = store();
        seed_enriched_at(&repo, 48).await;

        let freshness = entities
            .freshness("O", EntityType::Company, &fields(json!({"domain": "acme.com"})), 24)
            .await
            .unwrap();
        assert!(!freshness.fresh);
    }

    #[tokio::test]
    async fn test_freshness_never_guesses() {
        let (entities, repo) = store();
        seed_enriched_at(&repo, 1).await;

        let missing = entities
            .freshness("O", EntityType::Company, &Map::new(), 24)
            .await
            .unwrap();
        assert!(!missing.fresh);

        let null_field = entities
            .freshness("O", EntityType::Company, &fields(json!({"domain": null})), 24)
            .await
            .unwrap();
        assert!(!null_field.fresh);

        let no_natural_key = entities
            .freshness("O", EntityType::Company, &fields(json!({"industry": "saas"})), 24)
            .await
            .unwrap();
        assert!(!no_natural_key.fresh);
        assert!(no_natural_key.entity_id.is_none());
    }

    #[tokio::test]
    async fn test_huge_freshness_window_covers_all_time() {
        let (entities, repo) = store();
        let identity = fields(json!({"domain": "acme.com"}));

        let missing = entities
            .freshness("O", EntityType::Company, &identity, 3_000_000_000_000)
            .await
            .unwrap();
        assert!(!missing.fresh);

        seed_enriched_at(&repo, 24 * 365 * 50).await;
        for hours in [3_000_000_000_000, i64::MAX] {
            let freshness = entities
                .freshness("O", EntityType::Company, &identity, hours)
                .await
                .unwrap();
            assert!(freshness.fresh, "window of {} hours", hours);
        }

        let negative = entities
            .freshness("O", EntityType::Company, &identity, i64::MIN)
            .await
            .unwrap();
        assert!(!negative.fresh);
    }

    #[tokio::test]
    async fn test_freshness_at_uses_supplied_clock() {
        let (entities, repo) = store();
        seed_enriched_at(&repo, 1).await;
        let later = Utc::now() + Duration::hours(30);

        let freshness = entities
            .freshness_at("O", EntityType::Company, &fields(json!({"domain": "acme.com"})), 24, later)
            .await
            .unwrap();
        assert!(!freshness.fresh);
    }
}
