//! Frontier computation: which tasks a superstep schedules.
//!
//! Pure with respect to its inputs. Given the same finished tasks, merged
//! state and topology it produces the same tasks with the same ids, which
//! is what lets a resumed run address the exact tasks it left behind.

use std::collections::BTreeSet;

use latch_checkpoint::ids::{derive_task_id, pull_path, push_path};
use latch_checkpoint::send::{SendDirective, extract_sends};
use latch_checkpoint::types::TaskRecord;
use latch_core::error::{GraphError, Result};
use serde_json::Value;

use crate::compiled::CompiledStateGraph;
use crate::constants::{END, START};
use crate::edge::Route;

/// Accumulates the tasks of one frontier. Pull tasks are deduplicated and
/// ordered by node name; push tasks keep emission order.
struct FrontierBuilder<'g> {
    graph: &'g CompiledStateGraph,
    step: usize,
    pulls: BTreeSet<String>,
    pushes: Vec<TaskRecord>,
}

impl<'g> FrontierBuilder<'g> {
    fn new(graph: &'g CompiledStateGraph, step: usize) -> Self {
        Self {
            graph,
            step,
            pulls: BTreeSet::new(),
            pushes: Vec::new(),
        }
    }

    fn push(&mut self, source_id: &str, send: SendDirective, index: &mut usize) {
        let path = push_path(source_id, &send.node, *index);
        *index += 1;
        let id = derive_task_id(self.step, &path);
        self.pushes
            .push(TaskRecord::new(id, send.node, path, send.input));
    }

    /// Follow every edge out of `node`, evaluated on `state`.
    fn follow(&mut self, source_id: &str, node: &str, state: &Value, index: &mut usize) {
        let graph = self.graph;
        for target in graph.edges_from(node) {
            if target != END {
                self.pulls.insert(target.clone());
            }
        }
        for ce in graph.conditional_edges().iter().filter(|ce| ce.from == node) {
            for route in ce.resolve(state) {
                match route {
                    Route::Node(target) if target == END => {}
                    Route::Node(target) => {
                        self.pulls.insert(target);
                    }
                    Route::Send(send) => self.push(source_id, send, index),
                }
            }
        }
    }

    fn finish(self, state: &Value) -> Result<Vec<TaskRecord>> {
        let step = self.step;
        let mut tasks: Vec<TaskRecord> = self
            .pulls
            .into_iter()
            .map(|node| {
                let path = pull_path(&node);
                TaskRecord::new(derive_task_id(step, &path), node, path, state.clone())
            })
            .collect();
        tasks.extend(self.pushes);

        for task in &tasks {
            if self.graph.node(&task.node).is_none() {
                return Err(GraphError::InvalidGraph(format!(
                    "Unknown node '{}' routed to during execution",
                    task.node
                ))
                .into());
            }
        }
        Ok(tasks)
    }
}

impl CompiledStateGraph {
    /// Tasks of the first superstep of a run, triggered from `START`.
    pub fn initial_frontier(&self, step: usize, state: &Value) -> Result<Vec<TaskRecord>> {
        let mut builder = FrontierBuilder::new(self, step);
        let mut index = 0;
        builder.follow(START, START, state, &mut index);
        builder.finish(state)
    }

    /// Tasks of superstep `step`, triggered by the completed tasks of the
    /// previous one. `state` is the state after merging their writes.
    ///
    /// Each finished task contributes its own fan-out directives first, then
    /// the routes of the edges leaving its node. A task that routes to a node
    /// more than once still yields one pull task for it.
    pub fn next_frontier(
        &self,
        step: usize,
        finished: &[TaskRecord],
        state: &Value,
    ) -> Result<Vec<TaskRecord>> {
        let mut builder = FrontierBuilder::new(self, step);
        for task in finished {
            let Some(writes) = task.writes() else {
                continue;
            };
            let mut index = 0;
            for send in extract_sends(writes).unwrap_or_default() {
                builder.push(&task.id, send, &mut index);
            }
            builder.follow(&task.id, &task.node, state, &mut index);
        }
        builder.finish(state)
    }
}
