//! Database models for runs, step results, canonical entities and timelines.

mod entity;
mod run;
mod step_result;
mod timeline;

pub use entity::{EntityRecord, EntitySnapshot};
pub use run::{NewRun, PipelineRun, RunTransition};
pub use step_result::{NewStepResult, StepCompletion, StepResult};
pub use timeline::{NewTimelineEvent, TimelineEvent};
