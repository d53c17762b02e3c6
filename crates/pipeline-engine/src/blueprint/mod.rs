//! Blueprint snapshots: the immutable step list a run executes.

pub mod parser;
pub mod types;

pub use parser::{parse_blueprint, validate_blueprint};
pub use types::{BlueprintSnapshot, SkipIfFresh, StepConfig, StepSpec, DEFAULT_FAN_OUT_FIELD};
