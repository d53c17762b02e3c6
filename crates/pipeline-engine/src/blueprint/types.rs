//! Blueprint snapshot types.
//!
//! Persisted step spec shape:
//!
//! ```json
//! {
//!   "position": 2,
//!   "operation_id": "company.enrich",
//!   "fan_out": false,
//!   "step_config": {
//!     "condition": {"field": "domain", "op": "exists"},
//!     "skip_if_fresh": {"max_age_hours": 24, "identity_fields": ["domain"]},
//!     "provider_order": ["a", "b"]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::condition::ConditionExpr;
use crate::entity::EntityType;

/// Default key holding the candidate list on a fan-out step's output.
pub const DEFAULT_FAN_OUT_FIELD: &str = "results";

/// Freshness gate for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipIfFresh {
    pub max_age_hours: i64,

    /// Context paths whose values identify the entity to look up.
    pub identity_fields: Vec<String>,
}

/// Per-step configuration. Keys the engine does not know are kept in
/// `options` and passed through to the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionExpr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if_fresh: Option<SkipIfFresh>,

    /// Keep running after this step fails.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_failure: bool,

    /// Output key holding fan-out candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out_field: Option<String>,

    /// Operation-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub position: i32,
    pub operation_id: String,

    #[serde(default)]
    pub fan_out: bool,

    #[serde(default)]
    pub step_config: StepConfig,
}

impl StepSpec {
    pub fn new(position: i32, operation_id: &str) -> Self {
        Self {
            position,
            operation_id: operation_id.to_string(),
            fan_out: false,
            step_config: StepConfig::default(),
        }
    }

    /// Entity type named by the operation id namespace.
    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::from_operation_id(&self.operation_id)
    }

    pub fn fan_out_field(&self) -> &str {
        self.step_config
            .fan_out_field
            .as_deref()
            .unwrap_or(DEFAULT_FAN_OUT_FIELD)
    }
}

/// Immutable ordered step list captured at run creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintSnapshot {
    pub steps: Vec<StepSpec>,
}

impl BlueprintSnapshot {
    /// Steps at or after `start_position`, ascending.
    pub fn steps_from(&self, start_position: i32) -> impl Iterator<Item = &StepSpec> {
        self.steps.iter().filter(move |s| s.position >= start_position)
    }

    pub fn first_position(&self) -> Option<i32> {
        self.steps.first().map(|s| s.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_config_keeps_operation_options() {
        let step: StepSpec = serde_json::from_value(json!({
            "position": 1,
            "operation_id": "company.search",
            "fan_out": true,
            "step_config": {
                "fan_out_field": "companies",
                "provider_order": ["a", "b"],
                "limit": 25
            }
        }))
        .unwrap();

        assert!(step.fan_out);
        assert_eq!(step.fan_out_field(), "companies");
        assert_eq!(step.step_config.options.get("limit"), Some(&json!(25)));
        assert!(!step.step_config.options.contains_key("fan_out_field"));
        assert_eq!(step.entity_type(), Some(EntityType::Company));
    }

    #[test]
    fn test_step_config_defaults() {
        let step: StepSpec =
            serde_json::from_value(json!({"position": 3, "operation_id": "person.find"})).unwrap();
        assert!(!step.fan_out);
        assert!(!step.step_config.continue_on_failure);
        assert!(step.step_config.condition.is_none());
        assert_eq!(step.fan_out_field(), DEFAULT_FAN_OUT_FIELD);
    }

    #[test]
    fn test_steps_from() {
        let snapshot = BlueprintSnapshot {
            steps: vec![StepSpec::new(1, "a.x"), StepSpec::new(5, "b.y"), StepSpec::new(9, "c.z")],
        };
        let positions: Vec<i32> = snapshot.steps_from(5).map(|s| s.position).collect();
        assert_eq!(positions, vec![5, 9]);
    }
}
