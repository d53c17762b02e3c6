//! Canonical entities: schemas, identity resolution and the versioned store.

pub mod identity;
pub mod schema;
mod store;
mod types;

pub use identity::{resolve_identity, Identity};
pub use store::EntityStateStore;
pub use types::{EntityType, Freshness, UpsertOutcome, UpsertRequest, UpsertResult};
