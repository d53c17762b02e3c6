//! Engine and server configuration.

use serde::Deserialize;

/// Persistence backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from `PIPELINE_*` environment variables.
///
/// - `PIPELINE_HOST` / `PIPELINE_PORT`: bind address (default `0.0.0.0:8090`)
/// - `PIPELINE_STORE_BACKEND`: `postgres` (default) or `memory`
/// - `PIPELINE_OPERATION_SERVICE_URL`: base URL of the Operation Execution Service
/// - `PIPELINE_MAX_CONCURRENT_RUNS`: runs executing at once across all trees
/// - `PIPELINE_MAX_FAN_OUT_DEPTH`: deepest run tree level allowed to fan out
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    #[serde(default = "default_operation_service_url")]
    pub operation_service_url: String,

    /// Per-call timeout for the Operation Execution Service, in seconds
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    #[serde(default = "default_max_fan_out_depth")]
    pub max_fan_out_depth: i32,

    /// Re-dispatch runs left `queued` by a previous process on startup
    #[serde(default = "default_true")]
    pub resume_queued_runs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_server_name() -> String {
    "pipeline-engine".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_operation_service_url() -> String {
    "http://localhost:8091".to_string()
}

fn default_operation_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_runs() -> usize {
    32
}

fn default_max_fan_out_depth() -> i32 {
    8
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from `PIPELINE_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("PIPELINE_").from_env::<AppConfig>()
    }

    /// Server bind address suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            debug: false,
            log_format: default_log_format(),
            store_backend: default_store_backend(),
            operation_service_url: default_operation_service_url(),
            operation_timeout_secs: default_operation_timeout_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
            max_fan_out_depth: default_max_fan_out_depth(),
            resume_queued_runs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8090);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.max_fan_out_depth, 8);
        assert_eq!(config.bind_address(), "0.0.0.0:8090");
    }

    #[test]
    fn test_backend_deserializes_lowercase() {
        let backend: StoreBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
