//! A store that stops accepting writes must not lose or corrupt a thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use latch_checkpoint::prelude::*;
use latch_core::config::RunConfig;
use latch_core::error::{GraphError, LatchError, Result};
use latch_graph::prelude::*;

/// In-memory store that accepts a fixed number of writes, then reports
/// itself unavailable. Reads keep working.
struct FailingStore {
    inner: MemoryCheckpointStore,
    writes_left: AtomicUsize,
}

impl FailingStore {
    fn new(writes: usize) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            writes_left: AtomicUsize::new(writes),
        }
    }

    fn allow(&self, writes: usize) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    fn admit(&self) -> Result<()> {
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| GraphError::StoreUnavailable("disk full".into()).into())
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<String> {
        self.admit()?;
        self.inner.put(checkpoint).await
    }

    async fn put_fork(&self, checkpoint: Checkpoint) -> Result<String> {
        self.admit()?;
        self.inner.put_fork(checkpoint).await
    }

    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        self.inner.get(thread_id, checkpoint_id).await
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.inner.get_latest(thread_id).await
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.inner.list(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.inner.delete_thread(thread_id).await
    }
}

/// entry -> one `check` task per item; items starting with "ask" suspend.
fn build_graph(counter: Arc<ExecutionCounter>) -> CompiledStateGraph {
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("items", json!([]));
    graph.add_append_channel("checked");

    graph
        .add_node(NodeFn::new("entry", |_state: Value, _ctx| async move {
            Ok(json!({}))
        }))
        .unwrap();
    graph
        .add_node(NodeFn::new("check", |input: Value, ctx: NodeContext| async move {
            let item = input["item"].as_str().unwrap_or_default().to_string();
            let verdict = if item.starts_with("ask") {
                ctx.suspend(json!({"item": item}))?
            } else {
                json!("auto")
            };
            Ok(json!({"checked": [{"item": item, "verdict": verdict}]}))
        }))
        .unwrap();

    graph.add_edge(START, "entry");
    graph.add_conditional_edges(ConditionalEdge::fan_out(
        "entry",
        |state: &Value| {
            state["items"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|item| SendDirective::new("check", json!({"item": item})))
                .collect()
        },
        ["check"],
    ));
    graph.add_edge("check", END);
    graph.compile().unwrap().with_observer(counter)
}

fn items() -> Value {
    json!({"items": ["plain", "ask-1", "ask-2"]})
}

fn is_unavailable(err: &LatchError) -> bool {
    matches!(err, LatchError::Graph(GraphError::StoreUnavailable(_)))
}

#[tokio::test]
async fn failed_write_at_the_interrupt_boundary_keeps_the_previous_checkpoint() {
    let counter = Arc::new(ExecutionCounter::new());
    let graph = build_graph(counter.clone());
    // "input" and the step-0 "loop" checkpoint succeed; the interrupt commit fails.
    let store = FailingStore::new(2);
    let config = RunConfig::new().with_thread_id("boundary");

    let err = graph.invoke(items(), &config, &store).await.unwrap_err();
    assert!(is_unavailable(&err), "unexpected error: {err:?}");

    let latest = store.get_latest("boundary").await.unwrap().unwrap();
    assert_eq!(latest.metadata.source, "loop");
    assert!(!latest.has_interrupts());
    assert!(graph.pending_interrupts("boundary", &store).await.unwrap().is_empty());
    assert_eq!(store.list("boundary").await.unwrap().len(), 2);

    // Once the store is back, continuing reruns the step and suspends as usual.
    store.allow(usize::MAX);
    let out = graph.invoke(GraphInput::Continue, &config, &store).await.unwrap();
    assert_eq!(out.interrupts.len(), 2);
    assert_eq!(counter.count("check"), 6);
    assert_eq!(
        graph.pending_interrupts("boundary", &store).await.unwrap(),
        out.interrupts
    );
}

#[tokio::test]
async fn failed_write_during_resume_leaves_interrupts_pending() {
    let graph = build_graph(Arc::new(ExecutionCounter::new()));
    let store = FailingStore::new(usize::MAX);
    let config = RunConfig::new().with_thread_id("resume");

    let out = graph.invoke(items(), &config, &store).await.unwrap();
    assert_eq!(out.interrupts.len(), 2);
    let before = store.get_latest("resume").await.unwrap().unwrap();

    store.allow(0);
    let first = &out.interrupts[0];
    let err = graph
        .invoke(Command::default().with(first.id.clone(), json!("yes")), &config, &store)
        .await
        .unwrap_err();
    assert!(is_unavailable(&err), "unexpected error: {err:?}");

    let after = store.get_latest("resume").await.unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(
        graph.pending_interrupts("resume", &store).await.unwrap(),
        out.interrupts
    );

    // The same answers go through once writes succeed again.
    store.allow(usize::MAX);
    let resume = Command::resume(out.interrupts.iter().map(|i| (i.id.clone(), json!("yes"))));
    let done = graph.invoke(resume, &config, &store).await.unwrap();
    assert!(done.is_complete());
    assert_eq!(done.state["checked"].as_array().unwrap().len(), 3);
}
