//! Service layer between HTTP handlers and the engine.

pub mod entity;
pub mod run;

pub use entity::EntityService;
pub use run::RunService;
