//! The superstep loop.
//!
//! A run moves through supersteps. Each one executes every runnable task of
//! the frontier concurrently, then either suspends (some task raised an
//! interrupt: nothing is merged and the frontier is persisted as-is) or
//! merges all writes in frontier order and computes the next frontier. A
//! checkpoint is written at every boundary, so a process can stop after any
//! of them and a later invocation picks up exactly there.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::Instrument;
use uuid::Uuid;

use latch_checkpoint::command::GraphInput;
use latch_checkpoint::interrupt::Interrupt;
use latch_checkpoint::send::strip_sends;
use latch_checkpoint::store::CheckpointStore;
use latch_checkpoint::types::{Checkpoint, CheckpointMetadata, GraphOutput, TaskRecord, TaskStatus};
use latch_core::config::RunConfig;
use latch_core::error::{GraphError, LatchError, Result};
use serde_json::Value;

use crate::compiled::{Channels, CompiledStateGraph};
use crate::context::{InterruptRegistry, NodeContext};
use crate::observer::TaskOutcome;
use crate::resume::ResumePlan;

/// In-memory state of a run between checkpoints.
pub(crate) struct Run {
    pub thread_id: String,
    pub step: usize,
    /// Last checkpoint written or loaded.
    pub parent_id: Option<String>,
    pub channels: Channels,
    /// Frontier of `step`.
    pub tasks: Vec<TaskRecord>,
    /// Interrupted tasks that got a new resume value and must run again.
    pub rerun: HashSet<String>,
    pub resumed: bool,
    /// The next commit branches from a checkpoint picked by
    /// `RunConfig::checkpoint_id` rather than appending to the latest.
    pub forked: bool,
}

impl Run {
    pub(crate) fn from_checkpoint(graph: &CompiledStateGraph, checkpoint: Checkpoint) -> Self {
        Self {
            channels: graph.channels_from(Some(&checkpoint.channel_values)),
            thread_id: checkpoint.thread_id,
            step: checkpoint.step,
            parent_id: Some(checkpoint.id),
            tasks: checkpoint.tasks,
            rerun: HashSet::new(),
            resumed: false,
            forked: false,
        }
    }

    fn is_runnable(&self, task: &TaskRecord) -> bool {
        task.is_pending() || (task.is_interrupted() && self.rerun.contains(&task.id))
    }

    fn interrupts(&self) -> Vec<Interrupt> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.status {
                TaskStatus::Interrupted { interrupts } => Some(interrupts.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn output(&self) -> GraphOutput {
        GraphOutput {
            thread_id: self.thread_id.clone(),
            checkpoint_id: self.parent_id.clone().unwrap_or_default(),
            state: CompiledStateGraph::build_state(&self.channels),
            interrupts: self.interrupts(),
        }
    }
}

/// Report unknown ids together with where the thread stands afterwards.
fn unknown_ids(unknown: Vec<String>, applied: Vec<String>, output: GraphOutput) -> LatchError {
    GraphError::UnknownInterruptIds {
        unknown,
        applied,
        outstanding: output.interrupts.into_iter().map(|i| i.id).collect(),
        checkpoint_id: output.checkpoint_id,
    }
    .into()
}

impl CompiledStateGraph {
    /// Run the graph on a thread.
    ///
    /// - `GraphInput::Values` starts a new run from `START`. On a thread that
    ///   already has checkpoints the input is applied on top of the latest
    ///   state; interrupts still pending there are abandoned.
    /// - `GraphInput::Resume` delivers values to outstanding interrupts and
    ///   re-executes only the tasks that received one.
    /// - `GraphInput::Continue` picks up the latest checkpoint unchanged.
    ///
    /// Without `config.thread_id` a fresh thread id is generated and returned
    /// in the output. Invocations on the same thread are serialized.
    pub async fn invoke(
        &self,
        input: impl Into<GraphInput>,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<GraphOutput> {
        let thread_id = config
            .thread_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = tracing::info_span!("invoke", thread_id = %thread_id, run_id = %config.run_id);
        self.invoke_on_thread(input.into(), thread_id, config, store)
            .instrument(span)
            .await
    }

    async fn invoke_on_thread(
        &self,
        input: GraphInput,
        thread_id: String,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<GraphOutput> {
        let _lease = self.thread_locks.acquire(&thread_id).await;

        let base = self.load_checkpoint(&thread_id, config, store).await?;
        let forked = config.checkpoint_id.is_some();

        match input {
            GraphInput::Values(values) => {
                let mut run = self.start_run(thread_id, values, base)?;
                run.forked = forked;
                self.commit(&mut run, "input", config, store).await?;
                self.run_loop(run, config, store).await
            }
            GraphInput::Continue => {
                let checkpoint = base.ok_or_else(|| GraphError::CheckpointNotFound {
                    thread_id: thread_id.clone(),
                    checkpoint_id: "latest".into(),
                })?;
                let mut run = Run::from_checkpoint(self, checkpoint);
                run.forked = forked;
                if run.tasks.iter().any(TaskRecord::is_interrupted) {
                    return Ok(run.output());
                }
                self.run_loop(run, config, store).await
            }
            GraphInput::Resume(command) => {
                let ResumePlan {
                    mut run,
                    applied,
                    unknown,
                } = self.plan_resume(&thread_id, base, command)?;
                run.forked = forked;

                if applied.is_empty() {
                    let output = run.output();
                    if unknown.is_empty() {
                        return Ok(output);
                    }
                    tracing::warn!(?unknown, "resume matched no outstanding interrupt");
                    return Err(unknown_ids(unknown, applied, output));
                }

                tracing::info!(applied = applied.len(), step = run.step, "resuming");
                let output = self.run_loop(run, config, store).await?;
                if !unknown.is_empty() {
                    tracing::warn!(?unknown, "resume contained unknown interrupt ids");
                    return Err(unknown_ids(unknown, applied, output));
                }
                Ok(output)
            }
        }
    }

    async fn load_checkpoint(
        &self,
        thread_id: &str,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<Option<Checkpoint>> {
        match &config.checkpoint_id {
            Some(checkpoint_id) => store
                .get(thread_id, checkpoint_id)
                .await?
                .map(Some)
                .ok_or_else(|| {
                    GraphError::CheckpointNotFound {
                        thread_id: thread_id.to_string(),
                        checkpoint_id: checkpoint_id.clone(),
                    }
                    .into()
                }),
            None => store.get_latest(thread_id).await,
        }
    }

    fn start_run(&self, thread_id: String, input: Value, base: Option<Checkpoint>) -> Result<Run> {
        let (mut channels, step, parent_id) = match base {
            Some(cp) => {
                if cp.has_interrupts() {
                    tracing::warn!(
                        pending = cp.interrupts().len(),
                        "new input abandons pending interrupts"
                    );
                }
                (
                    self.channels_from(Some(&cp.channel_values)),
                    cp.step + 1,
                    Some(cp.id),
                )
            }
            None => (self.channels_from(None), 0, None),
        };

        match input {
            Value::Object(map) => {
                for (key, value) in map {
                    if let Some(ch) = channels.get_mut(&key) {
                        ch.update(vec![value])?;
                    }
                }
            }
            Value::Null => {}
            other => {
                return Err(GraphError::Channel(format!(
                    "graph input must be a JSON object, got {other}"
                ))
                .into());
            }
        }

        let state = Self::build_state(&channels);
        let tasks = self.initial_frontier(step, &state)?;
        Ok(Run {
            thread_id,
            step,
            parent_id,
            channels,
            tasks,
            rerun: HashSet::new(),
            resumed: false,
            forked: false,
        })
    }

    pub(crate) async fn run_loop(
        &self,
        mut run: Run,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<GraphOutput> {
        let shared_config = Arc::new(config.clone());
        let mut supersteps = 0;

        loop {
            if run.tasks.is_empty() {
                tracing::info!(step = run.step, "run finished");
                return Ok(run.output());
            }
            if supersteps >= config.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: config.recursion_limit,
                }
                .into());
            }
            supersteps += 1;

            self.execute_superstep(&mut run, &shared_config).await?;

            if run.tasks.iter().any(TaskRecord::is_interrupted) {
                let source = if run.resumed { "resume" } else { "interrupt" };
                self.commit(&mut run, source, config, store).await?;
                let output = run.output();
                tracing::info!(
                    step = run.step,
                    interrupts = output.interrupts.len(),
                    "run suspended"
                );
                return Ok(output);
            }

            Self::apply_writes(&mut run.channels, &run.tasks)?;
            let state = Self::build_state(&run.channels);
            let next_step = run.step + 1;
            let next = self.next_frontier(next_step, &run.tasks, &state)?;

            run.step = next_step;
            run.tasks = next;
            run.resumed = false;
            let source = if run.tasks.is_empty() { "done" } else { "loop" };
            self.commit(&mut run, source, config, store).await?;
        }
    }

    /// Execute every runnable task of the frontier concurrently and record
    /// the outcomes. A task failure aborts the superstep before anything is
    /// persisted; the first failure in frontier order is reported.
    async fn execute_superstep(&self, run: &mut Run, config: &Arc<RunConfig>) -> Result<()> {
        let mut started = Vec::new();
        let mut futures = Vec::new();

        for (index, task) in run.tasks.iter().enumerate() {
            if !run.is_runnable(task) {
                continue;
            }
            let node = self.nodes.get(&task.node).ok_or_else(|| {
                GraphError::InvalidGraph(format!(
                    "Node '{}' not found during execution",
                    task.node
                ))
            })?;
            let registry = Arc::new(InterruptRegistry::new(
                run.thread_id.as_str(),
                run.step,
                task.id.as_str(),
                task.node.as_str(),
                task.resume_values.clone(),
            ));
            if let Some(observer) = &self.observer {
                observer.on_task_start(task);
            }
            tracing::debug!(step = run.step, node = %task.node, task_id = %task.id, "task started");
            let ctx = NodeContext::new(Arc::clone(&registry), Arc::clone(config));
            futures.push(node.invoke(task.input.clone(), ctx));
            started.push((index, registry));
        }

        let results = join_all(futures).await;
        run.rerun.clear();

        let mut failure = None;
        for ((index, registry), result) in started.into_iter().zip(results) {
            let task = &mut run.tasks[index];
            let raised = registry.raised();
            let outcome = match result {
                Err(err) if !err.is_suspended() => {
                    tracing::warn!(
                        node = %task.node,
                        task_id = %task.id,
                        error = %err,
                        "task failed"
                    );
                    if failure.is_none() {
                        failure = Some((task.node.clone(), task.id.clone(), err));
                    }
                    TaskOutcome::Failed
                }
                // A node that swallowed the suspension is still suspended.
                _ if !raised.is_empty() => {
                    task.status = TaskStatus::Interrupted { interrupts: raised };
                    TaskOutcome::Interrupted
                }
                Ok(writes) => {
                    task.status = TaskStatus::Completed { writes };
                    TaskOutcome::Completed
                }
                Err(err) => {
                    if failure.is_none() {
                        failure = Some((task.node.clone(), task.id.clone(), err));
                    }
                    TaskOutcome::Failed
                }
            };
            if let Some(observer) = &self.observer {
                observer.on_task_end(task, outcome);
            }
        }

        match failure {
            Some((node, task_id, source)) => Err(GraphError::NodeExecution {
                node,
                task_id,
                source: Box::new(source),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Apply the writes of all completed tasks, grouped per channel in
    /// frontier order.
    fn apply_writes(channels: &mut Channels, tasks: &[TaskRecord]) -> Result<()> {
        let mut pending: HashMap<String, Vec<Value>> = HashMap::new();
        for task in tasks {
            let Some(writes) = task.writes() else {
                continue;
            };
            match strip_sends(writes) {
                Value::Object(map) => {
                    for (key, value) in map {
                        if channels.contains_key(&key) {
                            pending.entry(key).or_default().push(value);
                        } else {
                            tracing::debug!(
                                node = %task.node,
                                key = %key,
                                "ignoring write to undeclared channel"
                            );
                        }
                    }
                }
                Value::Null => {}
                other => {
                    return Err(GraphError::Channel(format!(
                        "node '{}' returned a non-object update: {other}",
                        task.node
                    ))
                    .into());
                }
            }
        }

        for (key, values) in pending {
            if let Some(ch) = channels.get_mut(&key) {
                ch.update(values)?;
            }
        }
        Ok(())
    }

    async fn commit(
        &self,
        run: &mut Run,
        source: &str,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<String> {
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            thread_id: run.thread_id.clone(),
            parent_id: run.parent_id.clone(),
            step: run.step,
            channel_values: Self::channel_values(&run.channels),
            tasks: run.tasks.clone(),
            metadata: CheckpointMetadata {
                source: source.to_string(),
                step: run.step,
                run_id: Some(config.run_id.to_string()),
                extra: config.metadata.clone(),
            },
            created_at: Utc::now(),
        };

        let id = if run.forked {
            store.put_fork(checkpoint.clone()).await?
        } else {
            store.put(checkpoint.clone()).await?
        };
        run.forked = false;
        tracing::debug!(checkpoint_id = %id, step = run.step, source, "checkpoint written");
        if let Some(observer) = &self.observer {
            observer.on_checkpoint(&checkpoint);
        }
        run.parent_id = Some(id.clone());
        Ok(id)
    }
}
