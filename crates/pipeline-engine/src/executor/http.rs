//! HTTP client for the Operation Execution Service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{OperationExecutor, OperationRequest, OperationResponse};
use crate::error::{AppError, AppResult};

/// Posts operation requests to `{base_url}/api/operations/execute`.
#[derive(Clone)]
pub struct HttpOperationExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOperationExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn execute_url(&self) -> String {
        format!("{}/api/operations/execute", self.base_url)
    }
}

#[async_trait]
impl OperationExecutor for HttpOperationExecutor {
    async fn execute(&self, request: &OperationRequest) -> AppResult<OperationResponse> {
        tracing::debug!(
            operation_id = %request.operation_id,
            url = %self.execute_url(),
            "Calling operation service"
        );

        let response = self
            .client
            .post(self.execute_url())
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<OperationResponse>().await?),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::ExternalService(format!(
                    "Operation {} returned {}: {}",
                    request.operation_id, status, body
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::OperationStatus;
    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::{json, Map, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn request() -> OperationRequest {
        let mut input = Map::new();
        input.insert("domain".to_string(), json!("acme.com"));
        OperationRequest {
            operation_id: "company.enrich".to_string(),
            entity_type: None,
            input,
            options: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_decodes_response() {
        let router = Router::new().route(
            "/api/operations/execute",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "status": "found",
                    "output": {"name": "Acme", "echo": body["input"]["domain"]},
                    "provider_attempts": [{"provider": "a", "status": "found"}]
                }))
            }),
        );
        let base_url = serve(router).await;
        let executor = HttpOperationExecutor::new(&base_url, Duration::from_secs(5)).unwrap();

        let response = executor.execute(&request()).await.unwrap();
        assert_eq!(response.status, OperationStatus::Found);
        let output = response.output.unwrap();
        assert_eq!(output.get("echo"), Some(&json!("acme.com")));
        assert_eq!(response.provider_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_external_error() {
        let router = Router::new().route(
            "/api/operations/execute",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "down") }),
        );
        let base_url = serve(router).await;
        let executor = HttpOperationExecutor::new(&base_url, Duration::from_secs(5)).unwrap();

        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
    }
}
