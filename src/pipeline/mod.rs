pub mod context;
pub mod runner;
pub mod task;
pub mod tasks;

pub use context::Context;
pub use runner::{Pipeline, RunOutcome};
pub use task::{Task, TaskStatus, TaskTransition};
pub use tasks::{build_pipeline, build_pipeline_with_order, TASK_ORDER};
