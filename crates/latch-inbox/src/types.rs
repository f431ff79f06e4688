use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::InboxError;

/// What a human may do with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanInterruptConfig {
    pub allow_ignore: bool,
    pub allow_respond: bool,
    pub allow_edit: bool,
    pub allow_accept: bool,
}

impl Default for HumanInterruptConfig {
    fn default() -> Self {
        Self {
            allow_ignore: true,
            allow_respond: false,
            allow_edit: true,
            allow_accept: true,
        }
    }
}

impl HumanInterruptConfig {
    /// Returns `true` if `response` is one of the allowed kinds.
    pub fn allows(&self, response: &HumanResponse) -> bool {
        match response {
            HumanResponse::Accept => self.allow_accept,
            HumanResponse::Ignore => self.allow_ignore,
            HumanResponse::Edit { .. } => self.allow_edit,
            HumanResponse::Response { .. } => self.allow_respond,
        }
    }
}

/// The action a node wants to take, with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }

    /// String argument `name`, if present.
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, InboxError> {
        self.arg_str(name).ok_or_else(|| InboxError::MissingArgument {
            action: self.action.clone(),
            argument: name.to_string(),
        })
    }
}

/// The payload surfaced to a human. `id` is the interrupt id the answer
/// must be keyed by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInterrupt {
    pub id: String,
    pub action_request: ActionRequest,
    pub config: HumanInterruptConfig,
    pub description: String,
}

/// A human's answer to a [`HumanInterrupt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HumanResponse {
    /// Go ahead as requested.
    Accept,
    /// Skip the action.
    Ignore,
    /// Go ahead with these arguments changed.
    Edit {
        #[serde(default)]
        args: Map<String, Value>,
    },
    /// Free-form feedback instead of a decision.
    Response { content: String },
}

impl HumanResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            HumanResponse::Accept => "accept",
            HumanResponse::Ignore => "ignore",
            HumanResponse::Edit { .. } => "edit",
            HumanResponse::Response { .. } => "response",
        }
    }

    /// Interpret a resume value.
    ///
    /// Anything that is not an object, and any object without a `type`,
    /// counts as acceptance.
    pub fn from_resume(value: Value) -> Result<Self, InboxError> {
        match &value {
            Value::Object(map) if map.contains_key("type") => serde_json::from_value(value)
                .map_err(|e| InboxError::InvalidResponse(e.to_string())),
            _ => Ok(HumanResponse::Accept),
        }
    }
}
