//! Canonical entity types and the upsert/freshness value types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Kind of canonical record an org can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Person,
    Job,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Company, EntityType::Person, EntityType::Job];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Person => "person",
            Self::Job => "job",
        }
    }

    /// Entity type named by an operation id's namespace prefix
    /// (`company.enrich` → company). Unknown namespaces yield `None`.
    pub fn from_operation_id(operation_id: &str) -> Option<Self> {
        let namespace = operation_id.split('.').next()?;
        namespace.parse().ok()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" => Ok(Self::Company),
            "person" => Ok(Self::Person),
            "job" => Ok(Self::Job),
            other => Err(AppError::Validation(format!("Unknown entity type: {}", other))),
        }
    }
}

/// Upsert input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub org_id: String,
    pub entity_type: EntityType,

    /// Canonical fields; validated against the type's schema before merge.
    pub fields: Map<String, Value>,

    /// Explicit id; wins over identity resolution.
    #[serde(default)]
    pub entity_id: Option<Uuid>,

    /// Version the writer last observed. Rejected as stale when it is not
    /// newer than the stored version.
    #[serde(default)]
    pub incoming_version: Option<i64>,

    #[serde(default)]
    pub operation_id: Option<String>,

    #[serde(default)]
    pub run_id: Option<Uuid>,
}

impl UpsertRequest {
    pub fn new(org_id: impl Into<String>, entity_type: EntityType, fields: Map<String, Value>) -> Self {
        Self {
            org_id: org_id.into(),
            entity_type,
            fields,
            entity_id: None,
            incoming_version: None,
            operation_id: None,
            run_id: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.incoming_version = Some(version);
        self
    }

    pub fn with_provenance(mut self, operation_id: Option<String>, run_id: Option<Uuid>) -> Self {
        self.operation_id = operation_id;
        self.run_id = run_id;
        self
    }
}

/// How an upsert was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Version check lost; the stored row was left unchanged.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub entity_id: Uuid,
    pub record_version: i64,
    pub created: bool,
    pub outcome: UpsertOutcome,

    /// Known fields whose values failed schema validation and were dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub fresh: bool,
    pub entity_id: Option<Uuid>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

impl Freshness {
    pub fn stale(entity_id: Option<Uuid>) -> Self {
        Self {
            fresh: false,
            entity_id,
            last_enriched_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_from_operation_namespace() {
        assert_eq!(EntityType::from_operation_id("company.enrich"), Some(EntityType::Company));
        assert_eq!(EntityType::from_operation_id("person.find_email"), Some(EntityType::Person));
        assert_eq!(EntityType::from_operation_id("job"), Some(EntityType::Job));
        assert_eq!(EntityType::from_operation_id("search.web"), None);
        assert_eq!(EntityType::from_operation_id(""), None);
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("Company".parse::<EntityType>().unwrap(), EntityType::Company);
        assert!("widget".parse::<EntityType>().is_err());
    }
}
