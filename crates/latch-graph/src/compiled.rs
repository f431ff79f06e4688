use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use latch_checkpoint::interrupt::Interrupt;
use latch_checkpoint::store::CheckpointStore;
use latch_checkpoint::types::{Checkpoint, TaskRecord};
use latch_core::error::Result;
use serde_json::Value;

use crate::channel::{Channel, ChannelSpec};
use crate::edge::ConditionalEdge;
use crate::node::NodeFn;
use crate::observer::ExecutionObserver;

pub(crate) type Channels = HashMap<String, Box<dyn Channel>>;

type ThreadLockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per thread id so invocations on the same thread run
/// one at a time while different threads proceed in parallel. An entry
/// lives only while some invocation holds or waits for it.
#[derive(Default)]
pub(crate) struct ThreadLocks {
    inner: Mutex<ThreadLockMap>,
}

impl ThreadLocks {
    fn map(&self) -> MutexGuard<'_, ThreadLockMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive use of `thread_id`.
    pub(crate) async fn acquire(&self, thread_id: &str) -> ThreadLease<'_> {
        let lock = self.map().entry(thread_id.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        ThreadLease {
            locks: self,
            thread_id: thread_id.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, thread_id: &str) {
        let mut map = self.map();
        // Only the map's own handle left: nobody holds or waits.
        if map.get(thread_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(thread_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

/// Exclusive use of one thread id; released on drop.
pub(crate) struct ThreadLease<'a> {
    locks: &'a ThreadLocks,
    thread_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ThreadLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.thread_id);
    }
}

/// The persisted state of a thread at one checkpoint.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub checkpoint_id: String,
    pub parent_id: Option<String>,
    pub step: usize,
    pub values: Value,
    /// Nodes that still have work in this superstep, in frontier order.
    pub next: Vec<String>,
    pub tasks: Vec<TaskRecord>,
    pub interrupts: Vec<Interrupt>,
    /// `loop`, `interrupt`, `resume` or `done`.
    pub source: String,
}

impl From<Checkpoint> for StateSnapshot {
    fn from(cp: Checkpoint) -> Self {
        Self {
            values: cp.state(),
            interrupts: cp.interrupts(),
            next: cp
                .tasks
                .iter()
                .filter(|t| !t.is_completed())
                .map(|t| t.node.clone())
                .collect(),
            checkpoint_id: cp.id,
            parent_id: cp.parent_id,
            step: cp.step,
            tasks: cp.tasks,
            source: cp.metadata.source,
        }
    }
}

/// A compiled state graph ready for execution.
///
/// Created by `StateGraph::compile()`. Run it with `invoke`, which executes
/// supersteps until the graph finishes or a task suspends.
pub struct CompiledStateGraph {
    pub(crate) nodes: HashMap<String, NodeFn>,
    pub(crate) adjacency: HashMap<String, Vec<String>>,
    pub(crate) conditional_edges: Vec<ConditionalEdge>,
    pub(crate) channel_specs: HashMap<String, ChannelSpec>,
    pub(crate) observer: Option<Arc<dyn ExecutionObserver>>,
    pub(crate) thread_locks: ThreadLocks,
}

impl CompiledStateGraph {
    pub(crate) fn new(
        nodes: HashMap<String, NodeFn>,
        adjacency: HashMap<String, Vec<String>>,
        conditional_edges: Vec<ConditionalEdge>,
        channel_specs: HashMap<String, ChannelSpec>,
    ) -> Self {
        Self {
            nodes,
            adjacency,
            conditional_edges,
            channel_specs,
            observer: None,
            thread_locks: ThreadLocks::default(),
        }
    }

    /// Attach an observer that sees every task execution and checkpoint.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the names of all nodes in the graph.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.keys().map(|s| s.as_str()).collect()
    }

    /// Get the static edges from a given node.
    pub fn edges_from(&self, node: &str) -> &[String] {
        self.adjacency
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn node(&self, name: &str) -> Option<&NodeFn> {
        self.nodes.get(name)
    }

    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channel_specs.contains_key(name)
    }

    /// Fresh channels, optionally restored from checkpointed values.
    pub(crate) fn channels_from(&self, values: Option<&HashMap<String, Value>>) -> Channels {
        self.channel_specs
            .iter()
            .map(|(key, spec)| {
                let mut channel = spec.create();
                if let Some(saved) = values.and_then(|v| v.get(key)) {
                    channel.restore(saved.clone());
                }
                (key.clone(), channel)
            })
            .collect()
    }

    /// Build a state Value from all channels.
    pub(crate) fn build_state(channels: &Channels) -> Value {
        let mut map = serde_json::Map::new();
        for (key, ch) in channels {
            map.insert(key.clone(), ch.get().clone());
        }
        Value::Object(map)
    }

    pub(crate) fn channel_values(channels: &Channels) -> HashMap<String, Value> {
        channels
            .iter()
            .map(|(k, ch)| (k.clone(), ch.checkpoint()))
            .collect()
    }

    /// The latest persisted state of a thread.
    pub async fn get_state(
        &self,
        thread_id: &str,
        store: &dyn CheckpointStore,
    ) -> Result<Option<StateSnapshot>> {
        Ok(store.get_latest(thread_id).await?.map(StateSnapshot::from))
    }

    /// Every checkpoint of a thread, oldest first.
    pub async fn get_state_history(
        &self,
        thread_id: &str,
        store: &dyn CheckpointStore,
    ) -> Result<Vec<StateSnapshot>> {
        Ok(store
            .list(thread_id)
            .await?
            .into_iter()
            .map(StateSnapshot::from)
            .collect())
    }

    /// Interrupts still waiting for a resume value, in frontier order.
    /// Reading them has no side effects; ids are the same on every call.
    pub async fn pending_interrupts(
        &self,
        thread_id: &str,
        store: &dyn CheckpointStore,
    ) -> Result<Vec<Interrupt>> {
        Ok(store
            .get_latest(thread_id)
            .await?
            .map(|cp| cp.interrupts())
            .unwrap_or_default())
    }
}

impl fmt::Debug for CompiledStateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes = self.node_names();
        nodes.sort();
        f.debug_struct("CompiledStateGraph")
            .field("nodes", &nodes)
            .field("conditional_edges", &self.conditional_edges.len())
            .finish()
    }
}
