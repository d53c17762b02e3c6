//! PostgreSQL connectivity, models, queries and migrations.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

pub use migrations::run_migrations;
pub use pool::{create_pool, health_check, DbPool};
