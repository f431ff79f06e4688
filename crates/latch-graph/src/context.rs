//! Per-task interrupt bookkeeping and the handle nodes receive.
//!
//! Every task execution gets a fresh [`InterruptRegistry`]. Suspend calls
//! are numbered in the order they happen inside that execution; the number
//! (the occurrence) together with thread, step and task id yields the
//! interrupt id. On resume the task runs again from the top, so every call
//! site before the blocked one finds its stored value and returns at once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use latch_checkpoint::ids::derive_interrupt_id;
use latch_checkpoint::interrupt::Interrupt;
use latch_core::config::RunConfig;
use latch_core::error::{LatchError, Result};
use serde_json::Value;

#[derive(Default)]
struct RegistryState {
    next_occurrence: usize,
    raised: Vec<Interrupt>,
}

/// Interrupt state of one task execution.
pub struct InterruptRegistry {
    thread_id: String,
    step: usize,
    task_id: String,
    node: String,
    /// Resume values by occurrence. Only ever read during the execution.
    resume_values: BTreeMap<usize, Value>,
    state: Mutex<RegistryState>,
}

impl InterruptRegistry {
    pub fn new(
        thread_id: impl Into<String>,
        step: usize,
        task_id: impl Into<String>,
        node: impl Into<String>,
        resume_values: BTreeMap<usize, Value>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            task_id: task_id.into(),
            node: node.into(),
            resume_values,
            state: Mutex::new(RegistryState::default()),
        }
    }

    // The guarded state is a counter and a list; a panicking node cannot
    // leave it half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt_id(&self, occurrence: usize) -> String {
        derive_interrupt_id(&self.thread_id, self.step, &self.task_id, occurrence)
    }

    /// Return the resume value for the next call site, or record an
    /// interrupt and fail with [`LatchError::Suspended`].
    pub fn suspend(&self, payload: Value) -> Result<Value> {
        let mut state = self.lock();
        let occurrence = state.next_occurrence;
        state.next_occurrence += 1;

        if let Some(value) = self.resume_values.get(&occurrence) {
            return Ok(value.clone());
        }

        let interrupt_id = self.interrupt_id(occurrence);
        tracing::debug!(
            task_id = %self.task_id,
            node = %self.node,
            occurrence,
            interrupt_id = %interrupt_id,
            "task suspended"
        );
        state.raised.push(Interrupt {
            id: interrupt_id.clone(),
            value: payload,
            task_id: self.task_id.clone(),
            node: self.node.clone(),
            step: self.step,
            occurrence,
        });
        Err(LatchError::Suspended { interrupt_id })
    }

    /// The id the next `suspend` call would get.
    pub fn next_interrupt_id(&self) -> String {
        let occurrence = self.lock().next_occurrence;
        self.interrupt_id(occurrence)
    }

    /// Interrupts recorded so far, in call order.
    pub fn raised(&self) -> Vec<Interrupt> {
        self.lock().raised.clone()
    }

    pub fn resume_values(&self) -> &BTreeMap<usize, Value> {
        &self.resume_values
    }
}

/// The handle a node body receives alongside its input.
#[derive(Clone)]
pub struct NodeContext {
    registry: Arc<InterruptRegistry>,
    config: Arc<RunConfig>,
}

impl NodeContext {
    pub fn new(registry: Arc<InterruptRegistry>, config: Arc<RunConfig>) -> Self {
        Self { registry, config }
    }

    /// A context outside any run, for calling node bodies directly.
    /// Every `suspend` call on it raises.
    pub fn detached(node: impl Into<String>) -> Self {
        let node = node.into();
        let registry = InterruptRegistry::new("detached", 0, node.clone(), node, BTreeMap::new());
        Self::new(Arc::new(registry), Arc::new(RunConfig::default()))
    }

    /// Suspend the task until a human supplies a value.
    ///
    /// Returns the resume value when one exists for this call site.
    /// Otherwise returns `Err(LatchError::Suspended)`; propagate it with `?`.
    pub fn suspend(&self, payload: Value) -> Result<Value> {
        self.registry.suspend(payload)
    }

    /// The interrupt id the next `suspend` call will use. Lets a node embed
    /// its own id in the payload it surfaces.
    pub fn next_interrupt_id(&self) -> String {
        self.registry.next_interrupt_id()
    }

    pub fn task_id(&self) -> &str {
        &self.registry.task_id
    }

    pub fn node(&self) -> &str {
        &self.registry.node
    }

    pub fn step(&self) -> usize {
        self.registry.step
    }

    pub fn thread_id(&self) -> &str {
        &self.registry.thread_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}
