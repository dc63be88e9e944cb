//! Sequential, fail-fast execution of a task list
use super::context::TaskContext;
use super::error::FaultReason;
use super::task::Task;
use tracing::{debug, warn};

/// What a successful run executed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub pipeline: &'static str,
    pub tasks: Vec<&'static str>,
}

/// Runs tasks strictly in order and stops at the first failure.
///
/// `run` consumes the runner and resolves to exactly one of success or fault,
/// so neither outcome can be reported twice. The next task starts only once
/// the current one has resolved, whether it completed immediately or after
/// suspending.
pub struct TaskRunner<'t> {
    pipeline: &'static str,
    tasks: Vec<&'t dyn Task>,
}

impl<'t> TaskRunner<'t> {
    pub fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            tasks: vec![],
        }
    }
    pub fn add_tasks<I>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = &'t dyn Task>,
    {
        self.tasks.extend(tasks);
        self
    }

    pub async fn run(self, cx: &mut TaskContext<'_>) -> Result<RunReport, FaultReason> {
        let mut executed = Vec::with_capacity(self.tasks.len());

        for task in self.tasks {
            debug!(
                trade_id = %cx.trade.id(),
                pipeline = self.pipeline,
                task = task.name(),
                "running task"
            );
            if let Err(error) = task.run(cx).await {
                warn!(
                    trade_id = %cx.trade.id(),
                    pipeline = self.pipeline,
                    task = task.name(),
                    error = %error,
                    "task failed"
                );
                return Err(FaultReason::TaskFailed {
                    pipeline: self.pipeline,
                    task: task.name(),
                    error,
                });
            }
            executed.push(task.name());
        }

        Ok(RunReport {
            pipeline: self.pipeline,
            tasks: executed,
        })
    }
}
