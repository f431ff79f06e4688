use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The key used in node output to carry fan-out directives.
pub const SEND_KEY: &str = "__send__";

/// A directive to run `node` in the next superstep with a private input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDirective {
    /// Target node name to execute.
    pub node: String,
    /// The input the target node receives instead of the graph state.
    pub input: Value,
}

impl SendDirective {
    pub fn new(node: impl Into<String>, input: Value) -> Self {
        Self {
            node: node.into(),
            input,
        }
    }
}

/// Create a node output that fans out to the given targets.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use latch_checkpoint::send::{send_output, SendDirective};
///
/// let output = send_output(vec![
///     SendDirective::new("map_node", json!({"item": "a"})),
///     SendDirective::new("map_node", json!({"item": "b"})),
/// ]);
/// assert!(output.get("__send__").is_some());
/// ```
pub fn send_output(sends: Vec<SendDirective>) -> Value {
    json!({ SEND_KEY: sends })
}

/// Check if a node output contains send directives.
pub fn is_send(output: &Value) -> bool {
    output.get(SEND_KEY).is_some()
}

/// Extract send directives from a node output.
///
/// Returns `None` if there are none or they are malformed.
pub fn extract_sends(output: &Value) -> Option<Vec<SendDirective>> {
    serde_json::from_value(output.get(SEND_KEY)?.clone()).ok()
}

/// Remove the send directives from a node output, leaving the state update.
pub fn strip_sends(output: &Value) -> Value {
    let mut update = output.clone();
    if let Value::Object(map) = &mut update {
        map.remove(SEND_KEY);
    }
    update
}
