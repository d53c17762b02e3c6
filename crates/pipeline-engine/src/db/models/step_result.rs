//! Step result rows, one per (run, position, attempt).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::engine::state::{SkipReason, StepStatus};

/// Database step result record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StepResult {
    pub id: i64,
    pub run_id: Uuid,
    pub position: i32,
    pub attempt: i32,
    pub operation_id: String,

    #[sqlx(try_from = "String")]
    pub status: StepStatus,

    pub skip_reason: Option<String>,

    /// Context the step was executed (or skipped) with.
    pub input: Option<serde_json::Value>,

    pub output: Option<serde_json::Value>,

    /// Ordered provider attempt audit trail from the Operation Execution Service.
    pub provider_attempts: serde_json::Value,

    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Values for inserting a step result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStepResult {
    pub run_id: Uuid,
    pub position: i32,
    pub attempt: i32,
    pub operation_id: String,
    pub status: StepStatus,
    pub skip_reason: Option<SkipReason>,
    pub input: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewStepResult {
    /// A step that is about to call the Operation Execution Service.
    pub fn running(run_id: Uuid, position: i32, attempt: i32, operation_id: &str, input: serde_json::Value) -> Self {
        Self {
            run_id,
            position,
            attempt,
            operation_id: operation_id.to_string(),
            status: StepStatus::Running,
            skip_reason: None,
            input: Some(input),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A step that never ran.
    pub fn skipped(
        run_id: Uuid,
        position: i32,
        attempt: i32,
        operation_id: &str,
        reason: SkipReason,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            run_id,
            position,
            attempt,
            operation_id: operation_id.to_string(),
            status: StepStatus::Skipped,
            skip_reason: Some(reason),
            input,
            started_at: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn into_result(self, id: i64) -> StepResult {
        StepResult {
            id,
            run_id: self.run_id,
            position: self.position,
            attempt: self.attempt,
            operation_id: self.operation_id,
            status: self.status,
            skip_reason: self.skip_reason.map(|r| r.as_str().to_string()),
            input: self.input,
            output: None,
            provider_attempts: serde_json::Value::Array(vec![]),
            error: None,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: None,
        }
    }
}

/// Terminal update for a running step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletion {
    pub status: StepStatus,
    pub skip_reason: Option<SkipReason>,
    pub output: Option<serde_json::Value>,
    pub provider_attempts: serde_json::Value,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl StepCompletion {
    pub fn apply_to(&self, result: &mut StepResult) {
        result.status = self.status;
        result.skip_reason = self.skip_reason.map(|r| r.as_str().to_string());
        result.output = self.output.clone();
        result.provider_attempts = self.provider_attempts.clone();
        result.error = self.error.clone();
        result.completed_at = Some(self.completed_at);
        result.duration_ms = Some(self.duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_skipped_result_carries_reason() {
        let result = NewStepResult::skipped(Uuid::new_v4(), 3, 1, "company.enrich", SkipReason::Fresh, None)
            .into_result(9);
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("fresh"));
        assert!(result.completed_at.is_some());
    }

    #[test]
    fn test_completion_applies_terminal_fields() {
        let mut result = NewStepResult::running(Uuid::new_v4(), 1, 1, "company.enrich", json!({}))
            .into_result(1);
        let completion = StepCompletion {
            status: StepStatus::Failed,
            skip_reason: None,
            output: None,
            provider_attempts: json!([{"provider": "a", "status": "error"}]),
            error: Some("timeout".to_string()),
            completed_at: Utc::now(),
            duration_ms: 1500,
        };
        completion.apply_to(&mut result);

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(result.duration_ms, Some(1500));
    }
}
