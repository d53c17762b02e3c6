//! Step Executor Bridge.
//!
//! The engine hands one operation id plus the current context to an
//! external Operation Execution Service and waits for a terminal answer.
//! Provider selection, retries and vendor field mapping all live behind
//! that service.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::state::{SkipReason, StepStatus};
use crate::entity::EntityType;
use crate::error::AppResult;

pub use http::HttpOperationExecutor;

/// Request body sent to the Operation Execution Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    pub input: Map<String, Value>,
    /// Operation-specific step options.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Terminal status reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Found,
    NotFound,
    Failed,
    Skipped,
}

impl OperationStatus {
    /// Step status and skip reason this answer maps to.
    pub fn step_status(self) -> (StepStatus, Option<SkipReason>) {
        match self {
            Self::Found | Self::NotFound => (StepStatus::Succeeded, None),
            Self::Skipped => (StepStatus::Skipped, Some(SkipReason::OperationSkipped)),
            Self::Failed => (StepStatus::Failed, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: OperationStatus,

    #[serde(default)]
    pub output: Option<Map<String, Value>>,

    /// Ordered provider attempts, passed through verbatim.
    #[serde(default)]
    pub provider_attempts: Vec<Value>,

    #[serde(default)]
    pub error: Option<String>,
}

impl OperationResponse {
    pub fn found(output: Value) -> Self {
        Self {
            status: OperationStatus::Found,
            output: output.as_object().cloned(),
            provider_attempts: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Failed,
            output: None,
            provider_attempts: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes a single operation. Implementations must return only terminal
/// answers; an `Err` is treated by the runner as a failed step.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, request: &OperationRequest) -> AppResult<OperationResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OperationStatus::Found.step_status(), (StepStatus::Succeeded, None));
        assert_eq!(OperationStatus::NotFound.step_status(), (StepStatus::Succeeded, None));
        assert_eq!(
            OperationStatus::Skipped.step_status(),
            (StepStatus::Skipped, Some(SkipReason::OperationSkipped))
        );
        assert_eq!(OperationStatus::Failed.step_status(), (StepStatus::Failed, None));
    }

    #[test]
    fn test_response_decodes_with_defaults() {
        let response: OperationResponse =
            serde_json::from_value(json!({"status": "not_found"})).unwrap();
        assert_eq!(response.status, OperationStatus::NotFound);
        assert!(response.output.is_none());
        assert!(response.provider_attempts.is_empty());
    }
}
