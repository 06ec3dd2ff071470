use std::collections::HashMap;

use tracing::{info, warn};

use super::context::Context;
use super::task::{Task, TaskStatus};
use crate::errors::HoundError;

/// Terminal classification of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every declared task returned `Continue`.
    Completed,
    /// A task returned `Abort`; the run failed at that task.
    Aborted { task: &'static str },
    /// A task returned `Halt`; the run succeeded early at that task.
    Halted { task: &'static str },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted { .. } => "aborted",
            Self::Halted { .. } => "halted",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted { task } => write!(f, "aborted at {task}"),
            Self::Halted { task } => write!(f, "halted at {task}"),
        }
    }
}

/// Ordered executor of tasks for one package run.
///
/// Tasks execute strictly in the declared order, one at a time; the run stops
/// at the first `Abort` or `Halt`. Registered tasks absent from the order are
/// never executed.
pub struct Pipeline {
    order: Vec<&'static str>,
    tasks: HashMap<&'static str, Box<dyn Task>>,
}

impl Pipeline {
    pub fn new(order: Vec<&'static str>) -> Self {
        Self {
            order,
            tasks: HashMap::new(),
        }
    }

    pub fn register(&mut self, task: Box<dyn Task>) {
        let name = task.name();
        if self.tasks.insert(name, task).is_some() {
            warn!(task = name, "Task registered twice; replacing prior registration");
        }
    }

    pub fn order(&self) -> &[&'static str] {
        &self.order
    }

    /// Execute the declared order against `context`.
    ///
    /// Fails before any task runs if a declared name has no registration.
    pub async fn run(&self, mut context: Context) -> Result<(Context, RunOutcome), HoundError> {
        for name in &self.order {
            if !self.tasks.contains_key(name) {
                return Err(HoundError::Internal(format!(
                    "pipeline order names unregistered task: {name}"
                )));
            }
        }

        for name in &self.order {
            info!(task = name, "Running task");
            let task = &self.tasks[name];
            let transition = task.run(context).await;
            context = transition.context;
            match transition.status {
                TaskStatus::Continue => {}
                TaskStatus::Abort => {
                    warn!(task = name, "Run aborted");
                    return Ok((context, RunOutcome::Aborted { task: name }));
                }
                TaskStatus::Halt => {
                    info!(task = name, "Run halted with success");
                    return Ok((context, RunOutcome::Halted { task: name }));
                }
            }
        }
        Ok((context, RunOutcome::Completed))
    }
}
