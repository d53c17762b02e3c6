//! SQL queries against the `pipeline` schema, one module per table group.

pub mod entities;
pub mod runs;
pub mod step_results;
pub mod timeline;
