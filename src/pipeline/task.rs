use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::Context;
use crate::errors::HoundError;
use crate::models::TaskOutcome;

/// Terminal classification of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Proceed to the next task in the declared order.
    Continue,
    /// Stop the run; the package failed a filter or a collaborator failed.
    Abort,
    /// Stop the run; the terminal goal was reached early.
    Halt,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Abort => write!(f, "abort"),
            Self::Halt => write!(f, "halt"),
        }
    }
}

/// Result of running one task: the updated context plus the task's status.
pub struct TaskTransition {
    pub context: Context,
    pub status: TaskStatus,
}

/// A named, single-shot unit of pipeline work.
///
/// Bodies must not return early without registering a ledger entry: every
/// execution path ends in [`complete`] or [`abort_with_error`], which append
/// exactly one entry to the package ledger before handing the context back.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, context: Context) -> TaskTransition;
}

/// Register a successful ledger entry and finish the task with `status`.
pub fn complete(
    mut context: Context,
    name: &'static str,
    started: Instant,
    status: TaskStatus,
) -> TaskTransition {
    let elapsed = started.elapsed().as_millis() as u64;
    debug!(task = name, time_ms = elapsed, "Task complete");
    context.package_mut().register_task_result(
        name,
        TaskOutcome {
            status,
            time: elapsed,
            result: None,
        },
    );
    TaskTransition { context, status }
}

/// Register a failed ledger entry carrying the structured error and finish
/// the task with `Abort`.
pub fn abort_with_error(
    mut context: Context,
    name: &'static str,
    error: HoundError,
    started: Instant,
) -> TaskTransition {
    let elapsed = started.elapsed().as_millis() as u64;
    debug!(task = name, time_ms = elapsed, error = %error, "Task aborted");
    context.package_mut().register_task_result(
        name,
        TaskOutcome {
            status: TaskStatus::Abort,
            time: elapsed,
            result: Some(error.payload()),
        },
    );
    TaskTransition {
        context,
        status: TaskStatus::Abort,
    }
}
