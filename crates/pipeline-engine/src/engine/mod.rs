//! Pipeline execution engine.
//!
//! - **Condition**: pure boolean gate per step
//! - **Context**: shallow, non-null-wins merge of step outputs
//! - **State**: run/step state machines and context reconstruction
//! - **Timeline**: per-entity audit of terminal step transitions
//! - **Fan-out**: one multi-result step becomes many child runs
//! - **Runner**: drives a single run to a terminal state
//! - **Dispatcher**: runs independent runs concurrently

pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod fan_out;
pub mod runner;
pub mod state;
pub mod timeline;

pub use condition::{ConditionExpr, Operator};
pub use context::Context;
pub use dispatcher::RunDispatcher;
pub use fan_out::FanOutCoordinator;
pub use runner::{PipelineRunner, RunOutcome};
pub use state::{RunError, RunErrorCode, RunStatus, SkipReason, StepStatus};
pub use timeline::{EntityRef, TimelineRecorder};
