//! Blueprint parsing and validation.

use serde_json::Value;

use super::types::BlueprintSnapshot;
use crate::error::{AppError, AppResult};

/// Parse a stored snapshot and validate it.
pub fn parse_blueprint(value: &Value) -> AppResult<BlueprintSnapshot> {
    let snapshot: BlueprintSnapshot = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Validation(format!("Invalid blueprint snapshot: {}", e)))?;
    validate_blueprint(&snapshot)?;
    Ok(snapshot)
}

/// Positions must be strictly increasing (and therefore unique); operation
/// ids must be non-empty; freshness windows must be positive with at least
/// one identity field.
pub fn validate_blueprint(snapshot: &BlueprintSnapshot) -> AppResult<()> {
    if snapshot.steps.is_empty() {
        return Err(AppError::Validation(
            "Blueprint must contain at least one step".to_string(),
        ));
    }

    for pair in snapshot.steps.windows(2) {
        if pair[1].position <= pair[0].position {
            return Err(AppError::Validation(format!(
                "Step positions must be strictly increasing: {} follows {}",
                pair[1].position, pair[0].position
            )));
        }
    }

    for step in &snapshot.steps {
        if step.operation_id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Step {}: operation_id is required",
                step.position
            )));
        }
        if let Some(gate) = &step.step_config.skip_if_fresh {
            if gate.max_age_hours <= 0 {
                return Err(AppError::Validation(format!(
                    "Step {}: skip_if_fresh.max_age_hours must be positive",
                    step.position
                )));
            }
            if gate.identity_fields.is_empty() {
                return Err(AppError::Validation(format!(
                    "Step {}: skip_if_fresh.identity_fields must not be empty",
                    step.position
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_blueprint() {
        let snapshot = parse_blueprint(&json!({
            "steps": [
                {"position": 1, "operation_id": "company.search", "fan_out": true},
                {"position": 2, "operation_id": "company.enrich", "step_config": {
                    "condition": {"all": [{"field": "domain", "op": "exists"}]},
                    "skip_if_fresh": {"max_age_hours": 24, "identity_fields": ["domain"]}
                }}
            ]
        }))
        .unwrap();
        assert_eq!(snapshot.steps.len(), 2);
        assert!(snapshot.steps[1].step_config.condition.is_some());
    }

    #[test]
    fn test_duplicate_positions_rejected() {
        let err = parse_blueprint(&json!({
            "steps": [
                {"position": 1, "operation_id": "a.x"},
                {"position": 1, "operation_id": "a.y"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_out_of_order_positions_rejected() {
        assert!(parse_blueprint(&json!({
            "steps": [
                {"position": 2, "operation_id": "a.x"},
                {"position": 1, "operation_id": "a.y"}
            ]
        }))
        .is_err());
    }

    #[test]
    fn test_malformed_condition_rejected() {
        assert!(parse_blueprint(&json!({
            "steps": [{"position": 1, "operation_id": "a.x", "step_config": {
                "condition": {"field": "domain", "op": "matches"}
            }}]
        }))
        .is_err());
    }

    #[test]
    fn test_empty_and_missing_steps_rejected() {
        assert!(parse_blueprint(&json!({"steps": []})).is_err());
        assert!(parse_blueprint(&json!({})).is_err());
        assert!(parse_blueprint(&json!({
            "steps": [{"position": 1, "operation_id": "a.x", "step_config": {
                "skip_if_fresh": {"max_age_hours": 0, "identity_fields": ["domain"]}
            }}]
        }))
        .is_err());
    }
}
