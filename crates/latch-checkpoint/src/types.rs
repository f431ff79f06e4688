use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interrupt::{INTERRUPT_KEY, Interrupt};

/// A snapshot of graph state at a superstep boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier for this checkpoint.
    pub id: String,
    /// Thread (conversation) identifier. Multiple checkpoints share a thread.
    pub thread_id: String,
    /// Parent checkpoint ID, forming a linked-list history.
    pub parent_id: Option<String>,
    /// The superstep that `tasks` belong to.
    pub step: usize,
    /// Channel values before `tasks` are applied.
    pub channel_values: HashMap<String, Value>,
    /// The frontier of superstep `step`. Empty once the run is finished.
    pub tasks: Vec<TaskRecord>,
    /// Metadata about the checkpoint.
    pub metadata: CheckpointMetadata,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// All outstanding interrupts, in frontier order.
    pub fn interrupts(&self) -> Vec<Interrupt> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.status {
                TaskStatus::Interrupted { interrupts } => Some(interrupts.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns `true` if at least one task is waiting on a resume value.
    pub fn has_interrupts(&self) -> bool {
        self.tasks.iter().any(|t| t.is_interrupted())
    }

    /// Returns `true` if there is nothing left to run.
    pub fn is_finished(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Channel values rendered as a JSON object.
    pub fn state(&self) -> Value {
        Value::Object(
            self.channel_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Metadata describing how a checkpoint was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Source of the checkpoint: "loop", "interrupt", "resume" or "done".
    pub source: String,
    /// The superstep number.
    pub step: usize,
    /// Run that wrote the checkpoint.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Caller-supplied metadata from the run configuration.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// One scheduled node execution inside a superstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Deterministic id derived from step and path.
    pub id: String,
    /// Node to invoke.
    pub node: String,
    /// How the task was triggered (`pull:<node>` or `push:...`).
    pub path: String,
    /// The exact input handed to the node.
    pub input: Value,
    pub status: TaskStatus,
    /// Resume values already consumed, keyed by suspend occurrence.
    #[serde(default)]
    pub resume_values: BTreeMap<usize, Value>,
}

impl TaskRecord {
    pub fn new(
        id: impl Into<String>,
        node: impl Into<String>,
        path: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            path: path.into(),
            input,
            status: TaskStatus::Pending,
            resume_values: BTreeMap::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.status, TaskStatus::Interrupted { .. })
    }

    /// Writes of a completed task.
    pub fn writes(&self) -> Option<&Value> {
        match &self.status {
            TaskStatus::Completed { writes } => Some(writes),
            _ => None,
        }
    }
}

/// Persisted outcome of a task. `running` only exists in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed { writes: Value },
    Interrupted { interrupts: Vec<Interrupt> },
}

/// The outcome of an invocation.
#[derive(Debug, Clone)]
pub struct GraphOutput {
    pub thread_id: String,
    /// Checkpoint written at the end of the invocation.
    pub checkpoint_id: String,
    /// Merged state. When interrupted, the writes of the blocked superstep
    /// are not yet applied.
    pub state: Value,
    /// Outstanding interrupts across all tasks of the blocked superstep.
    pub interrupts: Vec<Interrupt>,
}

impl GraphOutput {
    /// Returns `true` if the graph ran to completion.
    pub fn is_complete(&self) -> bool {
        self.interrupts.is_empty()
    }

    /// Returns `true` if at least one task is waiting on human input.
    pub fn is_interrupted(&self) -> bool {
        !self.interrupts.is_empty()
    }

    /// The state, with outstanding interrupts under `__interrupt__` when present.
    pub fn into_value(self) -> Value {
        let mut state = self.state;
        if !self.interrupts.is_empty() {
            if let Value::Object(map) = &mut state {
                map.insert(INTERRUPT_KEY.into(), Interrupt::to_output(&self.interrupts));
            }
        }
        state
    }
}
