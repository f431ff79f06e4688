use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_recursion_limit() -> usize {
    25
}

/// Per-invocation configuration for graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Thread the invocation belongs to. A fresh id is generated when absent.
    #[serde(default)]
    pub thread_id: Option<String>,

    /// Resume from this checkpoint instead of the latest one of the thread.
    #[serde(default)]
    pub checkpoint_id: Option<String>,

    /// Maximum number of supersteps a single invocation may run.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// Tags for filtering and categorization.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Arbitrary metadata key-value pairs, copied into checkpoint metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpoint_id: None,
            recursion_limit: default_recursion_limit(),
            run_id: Uuid::new_v4(),
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
