//! Deterministic entity identity.
//!
//! Each entity type has an ordered fallback chain of natural keys. The
//! first key whose fields are all present wins; the entity id is a UUIDv5 of
//! `entity_type:key_kind:value` under a per-type namespace, so the same
//! natural key always maps to the same id regardless of which run produced it.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::types::EntityType;

const COMPANY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a3e_8d4b_5c71_9e02_a4b6_c8d0_e1f2);
const PERSON_NAMESPACE: Uuid = Uuid::from_u128(0x7a2d_3b4f_9e5c_6d82_af13_b5c7_d9e1_f203);
const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x8b3e_4c50_af6d_7e93_b024_c6d8_eaf2_0314);

/// A natural key rule: one or more fields joined into the key value.
struct KeyRule {
    kind: &'static str,
    fields: &'static [&'static str],
}

const COMPANY_KEYS: &[KeyRule] = &[
    KeyRule { kind: "external_id", fields: &["external_id"] },
    KeyRule { kind: "domain", fields: &["domain"] },
    KeyRule { kind: "linkedin_url", fields: &["linkedin_url"] },
    KeyRule { kind: "name_country", fields: &["name", "country"] },
];

const PERSON_KEYS: &[KeyRule] = &[
    KeyRule { kind: "external_id", fields: &["external_id"] },
    KeyRule { kind: "linkedin_url", fields: &["linkedin_url"] },
    KeyRule { kind: "email", fields: &["email"] },
    KeyRule { kind: "name_company", fields: &["full_name", "company_domain"] },
];

const JOB_KEYS: &[KeyRule] = &[
    KeyRule { kind: "external_id", fields: &["external_id"] },
    KeyRule { kind: "job_url", fields: &["job_url"] },
    KeyRule { kind: "title_company", fields: &["title", "company_domain"] },
];

fn rules(entity_type: EntityType) -> &'static [KeyRule] {
    match entity_type {
        EntityType::Company => COMPANY_KEYS,
        EntityType::Person => PERSON_KEYS,
        EntityType::Job => JOB_KEYS,
    }
}

fn namespace(entity_type: EntityType) -> Uuid {
    match entity_type {
        EntityType::Company => COMPANY_NAMESPACE,
        EntityType::Person => PERSON_NAMESPACE,
        EntityType::Job => JOB_NAMESPACE,
    }
}

/// Resolved identity of a canonical entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub entity_id: Uuid,
    /// `key_kind:value`, stored on the entity row.
    pub natural_key: String,
}

impl Identity {
    fn from_key(entity_type: EntityType, kind: &str, value: &str) -> Self {
        let natural_key = format!("{}:{}", kind, value);
        let name = format!("{}:{}", entity_type.as_str(), natural_key);
        Self {
            entity_id: Uuid::new_v5(&namespace(entity_type), name.as_bytes()),
            natural_key,
        }
    }
}

fn key_part(fields: &Map<String, Value>, name: &str) -> Option<String> {
    let part = match fields.get(name)? {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!part.is_empty()).then_some(part)
}

/// Resolve from the natural-key chain only. Returns `None` when no rule's
/// fields are all present; never falls back to a content hash.
///
/// `fields` are expected to be schema-validated, so urls and domains are
/// already normalised.
pub fn resolve_natural(entity_type: EntityType, fields: &Map<String, Value>) -> Option<Identity> {
    rules(entity_type).iter().find_map(|rule| {
        let parts = rule
            .fields
            .iter()
            .map(|name| key_part(fields, name))
            .collect::<Option<Vec<_>>>()?;
        Some(Identity::from_key(entity_type, rule.kind, &parts.join("|")))
    })
}

/// Resolve an identity, falling back to a hash of every available field when
/// no natural key is present. `None` only for an empty field set.
pub fn resolve_identity(entity_type: EntityType, fields: &Map<String, Value>) -> Option<Identity> {
    if let Some(identity) = resolve_natural(entity_type, fields) {
        return Some(identity);
    }
    if fields.values().all(Value::is_null) {
        return None;
    }

    let non_null: Map<String, Value> = fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    // serde_json maps iterate in key order, so this serialisation is stable.
    let canonical = Value::Object(non_null).to_string();
    let digest = Uuid::new_v5(&namespace(entity_type), canonical.as_bytes());
    Some(Identity::from_key(entity_type, "content", &digest.simple().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let fields = object(json!({"domain": "acme.com", "name": "Acme"}));
        let a = resolve_identity(EntityType::Company, &fields).unwrap();
        let b = resolve_identity(EntityType::Company, &fields).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.natural_key, "domain:acme.com");
    }

    #[test]
    fn test_chain_prefers_earlier_keys() {
        let with_external = object(json!({"external_id": "C-1", "domain": "acme.com"}));
        let identity = resolve_identity(EntityType::Company, &with_external).unwrap();
        assert_eq!(identity.natural_key, "external_id:c-1");

        let compound = object(json!({"name": "Acme", "country": "US"}));
        let identity = resolve_identity(EntityType::Company, &compound).unwrap();
        assert_eq!(identity.natural_key, "name_country:acme|us");
    }

    #[test]
    fn test_same_key_different_extra_fields_same_id() {
        let a = resolve_identity(EntityType::Person, &object(json!({"email": "jane@acme.com"}))).unwrap();
        let b = resolve_identity(
            EntityType::Person,
            &object(json!({"email": "jane@acme.com", "title": "CTO"})),
        )
        .unwrap();
        assert_eq!(a.entity_id, b.entity_id);
    }

    #[test]
    fn test_entity_types_do_not_collide() {
        let fields = object(json!({"external_id": "42"}));
        let company = resolve_identity(EntityType::Company, &fields).unwrap();
        let job = resolve_identity(EntityType::Job, &fields).unwrap();
        assert_ne!(company.entity_id, job.entity_id);
    }

    #[test]
    fn test_partial_compound_key_is_not_natural() {
        let fields = object(json!({"title": "Engineer"}));
        assert!(resolve_natural(EntityType::Job, &fields).is_none());

        let fallback = resolve_identity(EntityType::Job, &fields).unwrap();
        assert!(fallback.natural_key.starts_with("content:"));
        assert_eq!(fallback, resolve_identity(EntityType::Job, &fields).unwrap());
    }

    #[test]
    fn test_empty_fields_resolve_nothing() {
        assert!(resolve_identity(EntityType::Company, &Map::new()).is_none());
    }
}
