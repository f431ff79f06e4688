use thiserror::Error;

/// Top-level error type for the Latch engine.
#[derive(Debug, Error)]
pub enum LatchError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Raised by `suspend` when no resume value exists for the call site.
    /// Node bodies propagate it with `?`; the runner turns it into an
    /// interrupted task and never returns it from `invoke`.
    #[error("Task suspended awaiting resume value for interrupt {interrupt_id}")]
    Suspended { interrupt_id: String },

    /// A failure raised by a node body.
    #[error("Node failure: {0}")]
    Node(String),

    #[error("{0}")]
    Other(String),
}

impl LatchError {
    /// Returns `true` if this error is the suspension signal.
    pub fn is_suspended(&self) -> bool {
        matches!(self, LatchError::Suspended { .. })
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Node error in '{node}' (task {task_id}): {source}")]
    NodeExecution {
        node: String,
        task_id: String,
        source: Box<LatchError>,
    },

    #[error("No pending interrupt to resume on thread '{thread_id}'")]
    NoPendingInterrupt { thread_id: String },

    /// Resume map named ids that are not outstanding. Matched ids in the
    /// same map (`applied`) were still consumed and persisted; `outstanding`
    /// and `checkpoint_id` describe the thread after that.
    #[error(
        "Unknown interrupt ids {unknown:?} (applied: {applied:?}, outstanding: {outstanding:?})"
    )]
    UnknownInterruptIds {
        unknown: Vec<String>,
        applied: Vec<String>,
        outstanding: Vec<String>,
        checkpoint_id: String,
    },

    #[error("Checkpoint '{checkpoint_id}' not found for thread '{thread_id}'")]
    CheckpointNotFound {
        thread_id: String,
        checkpoint_id: String,
    },

    /// A write that would fork or overwrite history: the id already exists,
    /// or the parent is no longer the thread's latest checkpoint.
    #[error("Checkpoint conflict on thread '{thread_id}' writing '{checkpoint_id}': {reason}")]
    CheckpointConflict {
        thread_id: String,
        checkpoint_id: String,
        reason: String,
    },

    #[error("Checkpoint store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, LatchError>;
