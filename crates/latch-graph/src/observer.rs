use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use latch_checkpoint::types::{Checkpoint, TaskRecord};

/// How a task execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Interrupted,
    Failed,
}

/// Hooks called by the runner as a run progresses.
///
/// Calls happen on the invoking task, never concurrently for one run.
pub trait ExecutionObserver: Send + Sync {
    /// A task is about to execute (including re-executions on resume).
    fn on_task_start(&self, _task: &TaskRecord) {}

    fn on_task_end(&self, _task: &TaskRecord, _outcome: TaskOutcome) {}

    /// A checkpoint was durably written.
    fn on_checkpoint(&self, _checkpoint: &Checkpoint) {}
}

/// Counts executions per node. Handy for asserting that resume does not
/// replay work that already completed.
#[derive(Debug, Default)]
pub struct ExecutionCounter {
    counts: Mutex<HashMap<String, usize>>,
}

impl ExecutionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `node` started executing.
    pub fn count(&self, node: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl ExecutionObserver for ExecutionCounter {
    fn on_task_start(&self, task: &TaskRecord) {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task.node.clone())
            .or_default() += 1;
    }
}
