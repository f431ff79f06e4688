use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The key under which outstanding interrupts appear in rendered output.
pub const INTERRUPT_KEY: &str = "__interrupt__";

/// A suspension raised by a task, waiting for a resume value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Deterministic id, stable across re-executions of the same call site.
    pub id: String,
    /// The payload surfaced to the human (e.g. an approval request).
    pub value: Value,
    /// The task that raised it.
    pub task_id: String,
    /// Node name of that task.
    pub node: String,
    /// Superstep the task belongs to.
    pub step: usize,
    /// Index of the suspend call within the task execution.
    pub occurrence: usize,
}

impl Interrupt {
    /// Render interrupts as the JSON array stored under `__interrupt__`.
    pub fn to_output(interrupts: &[Interrupt]) -> Value {
        Value::Array(
            interrupts
                .iter()
                .map(|i| serde_json::json!({ "id": i.id, "value": i.value }))
                .collect(),
        )
    }
}
