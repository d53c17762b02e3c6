//! Configuration loaded from environment variables via `envy`.

mod app;
mod database;

pub use app::{AppConfig, LogFormat, StoreBackend};
pub use database::DatabaseConfig;
