//! Pipeline Engine
//!
//! Executes blueprints (ordered lists of enrichment operations) against a
//! seed context, fans a step's multiple results out into child runs, and
//! folds the accumulated context into versioned canonical entities.
//!
//! ## Modules
//!
//! - [`blueprint`]: blueprint step types and validation
//! - [`engine`]: conditions, context merging, the runner and dispatcher
//! - [`entity`]: canonical schemas, identity resolution, versioned upserts
//! - [`executor`]: bridge to the Operation Execution Service
//! - [`store`]: persistence traits with Postgres and in-memory backends
//! - [`db`]: pool, migrations, row models and SQL queries
//! - [`handlers`] / [`services`]: the HTTP surface

pub mod blueprint;
pub mod config;
pub mod db;
pub mod engine;
pub mod entity;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod result_ext;
pub mod services;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
