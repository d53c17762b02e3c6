//! Run and step state machines, and context reconstruction from persisted
//! step results.
//!
//! Runs move `queued → running → {succeeded, failed, canceled}`; steps move
//! `queued → running → {succeeded, failed, skipped}`. Skips and failures are
//! statuses, never errors.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::context::{self, Context};
use crate::db::models::{PipelineRun, StepResult};

/// Returned when a persisted status string is not recognised.
#[derive(Debug, Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RunStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ParseStatusError { kind: "run", value }),
        }
    }
}

/// Lifecycle of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for StepStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(ParseStatusError { kind: "step", value }),
        }
    }
}

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Explicit `condition` evaluated false.
    ConditionNotMet,
    /// `skip_if_fresh` found a recent enough canonical entity.
    Fresh,
    /// The Operation Execution Service answered `skipped`.
    OperationSkipped,
    /// An earlier step fanned out; children own the remainder.
    FannedOut,
    /// An earlier step failed the run.
    UpstreamFailed,
    Canceled,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConditionNotMet => "condition_not_met",
            Self::Fresh => "fresh",
            Self::OperationSkipped => "operation_skipped",
            Self::FannedOut => "fanned_out",
            Self::UpstreamFailed => "upstream_failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable run failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorCode {
    BlueprintInvalid,
    StepFailed,
    FanOutDepthExceeded,
    StoreUnavailable,
    /// The task driving the run died before it reached a terminal state.
    ExecutionAborted,
}

/// Structured failure persisted on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub code: RunErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
}

impl RunError {
    pub fn new(code: RunErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Rebuild the context a run had when it reached its `start_position`:
/// the run's initial context, then the output of the latest succeeded
/// attempt of each earlier position, in position order.
pub fn reconstruct_context(run: &PipelineRun, results: &[StepResult]) -> Context {
    let started = Instant::now();
    let mut context = context::from_value(&run.initial_context);

    let mut latest: BTreeMap<i32, &StepResult> = BTreeMap::new();
    for result in results
        .iter()
        .filter(|r| r.position < run.start_position && r.status == StepStatus::Succeeded)
    {
        let slot = latest.entry(result.position).or_insert(result);
        if result.attempt > slot.attempt {
            *slot = result;
        }
    }

    for result in latest.values() {
        if let Some(Value::Object(output)) = &result.output {
            context::merge_into(&mut context, output);
        }
    }

    tracing::debug!(
        target: "pipeline_engine.performance",
        run_id = %run.id,
        replayed_steps = latest.len(),
        context_keys = context.len(),
        duration_us = started.elapsed().as_micros() as u64,
        "Context reconstructed from step results"
    );

    context
}

/// Next attempt number for a position, given the run's existing results.
pub fn next_attempt(results: &[StepResult], position: i32) -> i32 {
    results
        .iter()
        .filter(|r| r.position == position)
        .map(|r| r.attempt)
        .max()
        .map_or(1, |attempt| attempt + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn make_run(start_position: i32, initial_context: Value) -> PipelineRun {
        let id = Uuid::new_v4();
        PipelineRun {
            id,
            org_id: "org-1".to_string(),
            parent_run_id: None,
            root_run_id: id,
            depth: 0,
            entity_type: None,
            blueprint_snapshot: json!({"steps": []}),
            initial_context,
            status: RunStatus::Queued,
            start_position,
            error: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn make_result(run_id: Uuid, position: i32, attempt: i32, status: StepStatus, output: Value) -> StepResult {
        StepResult {
            id: i64::from(position * 10 + attempt),
            run_id,
            position,
            attempt,
            operation_id: "company.enrich".to_string(),
            status,
            skip_reason: None,
            input: None,
            output: Some(output),
            provider_attempts: json!([]),
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(RunStatus::try_from("canceled".to_string()).unwrap(), RunStatus::Canceled);
        assert_eq!(StepStatus::try_from("skipped".to_string()).unwrap(), StepStatus::Skipped);
        assert!(RunStatus::try_from("cancelled".to_string()).is_err());
        assert_eq!(SkipReason::ConditionNotMet.to_string(), "condition_not_met");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_reconstruct_context_replays_succeeded_steps_in_order() {
        let run = make_run(4, json!({"domain": "acme.com"}));
        let results = vec![
            make_result(run.id, 2, 1, StepStatus::Succeeded, json!({"employees": 20})),
            make_result(run.id, 1, 1, StepStatus::Succeeded, json!({"employees": 10, "name": "Acme"})),
            make_result(run.id, 3, 1, StepStatus::Skipped, json!({"name": "ignored"})),
            make_result(run.id, 4, 1, StepStatus::Succeeded, json!({"name": "beyond start"})),
        ];

        let context = reconstruct_context(&run, &results);
        assert_eq!(
            Value::Object(context),
            json!({"domain": "acme.com", "employees": 20, "name": "Acme"})
        );
    }

    #[test]
    fn test_reconstruct_context_uses_latest_attempt() {
        let run = make_run(2, json!({}));
        let results = vec![
            make_result(run.id, 1, 1, StepStatus::Succeeded, json!({"score": 1})),
            make_result(run.id, 1, 2, StepStatus::Succeeded, json!({"score": 2})),
        ];

        let context = reconstruct_context(&run, &results);
        assert_eq!(context.get("score"), Some(&json!(2)));
    }

    #[test]
    fn test_next_attempt() {
        let run_id = Uuid::new_v4();
        let results = vec![
            make_result(run_id, 1, 1, StepStatus::Failed, json!({})),
            make_result(run_id, 1, 2, StepStatus::Failed, json!({})),
        ];
        assert_eq!(next_attempt(&results, 1), 3);
        assert_eq!(next_attempt(&results, 2), 1);
    }

    #[test]
    fn test_run_error_serialization() {
        let error = RunError::new(RunErrorCode::StepFailed, "provider timeout").at(2);
        assert_eq!(
            error.to_value(),
            json!({"code": "step_failed", "message": "provider timeout", "position": 2})
        );
    }
}
