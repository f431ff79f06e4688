use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The key that marks a JSON invocation payload as a command rather than input.
pub const COMMAND_KEY: &str = "__command__";

/// A resume command: maps interrupt ids to the values their call sites receive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub resume: BTreeMap<String, Value>,
}

impl Command {
    /// Build a command from a complete resume map.
    pub fn resume<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            resume: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Add one more resume value.
    pub fn with(mut self, interrupt_id: impl Into<String>, value: Value) -> Self {
        self.resume.insert(interrupt_id.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.resume.is_empty()
    }
}

/// What an invocation is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphInput {
    /// Fresh input written into the state before a new run starts.
    Values(Value),
    /// Resume values for outstanding interrupts.
    Resume(Command),
    /// Pick up the latest checkpoint as it is, e.g. after a failed superstep.
    Continue,
}

impl GraphInput {
    /// Interpret a JSON payload. `{"__command__": {"resume": {...}}}` is a
    /// resume command, `null` continues, anything else is fresh input.
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        if value.is_null() {
            return Ok(GraphInput::Continue);
        }
        match value.get(COMMAND_KEY) {
            Some(cmd) => Ok(GraphInput::Resume(serde_json::from_value(cmd.clone())?)),
            None => Ok(GraphInput::Values(value)),
        }
    }

    /// Render back to the JSON form accepted by [`GraphInput::from_json`].
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            GraphInput::Values(v) => Ok(v.clone()),
            GraphInput::Resume(cmd) => {
                Ok(serde_json::json!({ COMMAND_KEY: serde_json::to_value(cmd)? }))
            }
            GraphInput::Continue => Ok(Value::Null),
        }
    }
}

impl From<Value> for GraphInput {
    fn from(value: Value) -> Self {
        GraphInput::Values(value)
    }
}

impl From<Command> for GraphInput {
    fn from(command: Command) -> Self {
        GraphInput::Resume(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_builds_map() {
        let cmd = Command::resume([("a", json!(1)), ("b", json!("two"))]);
        assert_eq!(cmd.resume.len(), 2);
        assert_eq!(cmd.resume["b"], json!("two"));
    }

    #[test]
    fn with_adds_and_overwrites() {
        let cmd = Command::default()
            .with("a", json!(1))
            .with("a", json!(2))
            .with("b", json!(3));
        assert_eq!(cmd.resume["a"], json!(2));
        assert_eq!(cmd.resume.len(), 2);
        assert!(!cmd.is_empty());
    }

    #[test]
    fn plain_json_is_fresh_input() {
        let input = GraphInput::from_json(json!({"items": ["a"]})).unwrap();
        assert_eq!(input, GraphInput::Values(json!({"items": ["a"]})));
    }

    #[test]
    fn command_json_is_resume() {
        let input =
            GraphInput::from_json(json!({ COMMAND_KEY: { "resume": { "id-1": "yes" } } })).unwrap();
        match input {
            GraphInput::Resume(cmd) => assert_eq!(cmd.resume["id-1"], json!("yes")),
            other => panic!("expected resume, got {other:?}"),
        }
    }

    #[test]
    fn null_continues() {
        assert_eq!(GraphInput::from_json(Value::Null).unwrap(), GraphInput::Continue);
        assert_eq!(GraphInput::Continue.to_json().unwrap(), Value::Null);
    }

    #[test]
    fn malformed_command_is_rejected() {
        assert!(GraphInput::from_json(json!({ COMMAND_KEY: { "resume": 5 } })).is_err());
    }

    #[test]
    fn to_json_matches_from_json() {
        let cmd = GraphInput::Resume(Command::default().with("x", json!({"type": "accept"})));
        let json = cmd.to_json().unwrap();
        assert!(json.get(COMMAND_KEY).is_some());
        assert_eq!(GraphInput::from_json(json).unwrap(), cmd);
    }

    #[test]
    fn from_impls() {
        assert!(matches!(GraphInput::from(json!({})), GraphInput::Values(_)));
        assert!(matches!(
            GraphInput::from(Command::default()),
            GraphInput::Resume(_)
        ));
    }
}
