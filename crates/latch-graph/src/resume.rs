//! Matching a resume command against the interrupts of a checkpoint.

use std::collections::HashMap;

use latch_checkpoint::command::Command;
use latch_checkpoint::types::{Checkpoint, TaskStatus};
use latch_core::error::{GraphError, Result};

use crate::compiled::CompiledStateGraph;
use crate::runner::Run;

/// A run restored from an interrupted checkpoint, with resume values
/// attached to the tasks they belong to.
pub(crate) struct ResumePlan {
    pub run: Run,
    /// Ids from the command that matched an outstanding interrupt.
    pub applied: Vec<String>,
    /// Ids from the command that did not.
    pub unknown: Vec<String>,
}

impl CompiledStateGraph {
    /// Route every value in `command` to the task and call site that raised
    /// the interrupt. Only tasks that receive at least one value are marked
    /// for re-execution; the others stay interrupted as they are.
    pub(crate) fn plan_resume(
        &self,
        thread_id: &str,
        base: Option<Checkpoint>,
        command: Command,
    ) -> Result<ResumePlan> {
        let checkpoint = base
            .filter(Checkpoint::has_interrupts)
            .ok_or_else(|| GraphError::NoPendingInterrupt {
                thread_id: thread_id.to_string(),
            })?;

        // interrupt id -> (task index, occurrence)
        let mut outstanding: HashMap<String, (usize, usize)> = HashMap::new();
        for (index, task) in checkpoint.tasks.iter().enumerate() {
            if let TaskStatus::Interrupted { interrupts } = &task.status {
                for interrupt in interrupts {
                    outstanding.insert(interrupt.id.clone(), (index, interrupt.occurrence));
                }
            }
        }

        let mut run = Run::from_checkpoint(self, checkpoint);
        run.resumed = true;

        let mut applied = Vec::new();
        let mut unknown = Vec::new();
        for (id, value) in command.resume {
            match outstanding.get(&id) {
                Some(&(index, occurrence)) => {
                    let task = &mut run.tasks[index];
                    task.resume_values.insert(occurrence, value);
                    run.rerun.insert(task.id.clone());
                    applied.push(id);
                }
                None => unknown.push(id),
            }
        }

        Ok(ResumePlan {
            run,
            applied,
            unknown,
        })
    }
}
