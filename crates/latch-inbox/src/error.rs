use latch_core::error::LatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("response '{kind}' is not allowed for action '{action}'")]
    ResponseNotAllowed { action: String, kind: String },

    #[error("invalid human response: {0}")]
    InvalidResponse(String),

    #[error("missing argument '{argument}' for action '{action}'")]
    MissingArgument { action: String, argument: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

impl From<InboxError> for LatchError {
    fn from(err: InboxError) -> Self {
        LatchError::Node(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_node_error() {
        let err: LatchError = InboxError::ResponseNotAllowed {
            action: "fast_analysis".into(),
            kind: "response".into(),
        }
        .into();
        assert!(matches!(err, LatchError::Node(_)));
        assert!(err.to_string().contains("'response' is not allowed"));
    }
}
