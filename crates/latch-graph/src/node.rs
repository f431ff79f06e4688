use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use latch_core::error::Result;
use serde_json::Value;

use crate::context::NodeContext;

pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

type AsyncNodeFn = dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync;

/// A graph node that wraps an async function operating on JSON state.
///
/// The function receives the task input (the merged state for edge-triggered
/// tasks, the private payload for fan-out tasks) and returns a state update.
/// It may run more than once for the same task when it suspends, so any side
/// effect before a `suspend` call must be safe to repeat.
#[derive(Clone)]
pub struct NodeFn {
    name: String,
    func: Arc<AsyncNodeFn>,
}

impl NodeFn {
    /// Create a new node with the given name and async function.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |input, ctx| Box::pin(func(input, ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the node. The returned future owns everything it needs.
    pub fn invoke(&self, input: Value, ctx: NodeContext) -> NodeFuture {
        (self.func)(input, ctx)
    }
}

impl std::fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFn").field("name", &self.name).finish()
    }
}
