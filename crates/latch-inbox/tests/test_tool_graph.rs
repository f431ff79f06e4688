//! Concurrent approval of tool calls through the inbox request contract.

use serde_json::{Value, json};

use latch_checkpoint::prelude::*;
use latch_core::config::RunConfig;
use latch_core::error::{GraphError, LatchError};
use latch_inbox::prelude::*;

fn instant_graph() -> latch_graph::prelude::CompiledStateGraph {
    build_tool_graph(ToolSettings::default().with_delay_ms(0)).unwrap()
}

fn both_tools() -> Value {
    json!({
        "tool_calls": [
            {"tool": "fast_analysis", "args": {"data": "dataset-A"}},
            {"tool": "slow_processing", "args": {"data": "dataset-B", "mode": "full"}},
        ]
    })
}

fn request_of(interrupt: &Interrupt) -> HumanInterrupt {
    serde_json::from_value(interrupt.value.clone()).unwrap()
}

fn outputs(state: &Value) -> Vec<String> {
    state["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["output"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn both_tools_interrupt_in_one_step() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-1");

    let out = graph.invoke(both_tools(), &config, &store).await.unwrap();
    assert_eq!(out.interrupts.len(), 2);

    let actions: Vec<_> = out
        .interrupts
        .iter()
        .map(|i| request_of(i).action_request.action)
        .collect();
    assert_eq!(actions, vec![FAST_ANALYSIS, SLOW_PROCESSING]);

    for interrupt in &out.interrupts {
        let request = request_of(interrupt);
        assert_eq!(request.id, interrupt.id);
        assert_eq!(request.config, HumanInterruptConfig::default());
    }
    assert_eq!(
        request_of(&out.interrupts[1]).description,
        "Slow processing tool needs approval for full processing of: dataset-B."
    );
}

#[tokio::test]
async fn accepting_both_completes_the_run() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-2");

    let out = graph.invoke(both_tools(), &config, &store).await.unwrap();
    let accept = serde_json::to_value(HumanResponse::Accept).unwrap();
    let command = Command::resume(out.interrupts.iter().map(|i| (i.id.clone(), accept.clone())));
    let done = graph.invoke(command, &config, &store).await.unwrap();

    assert!(done.is_complete());
    assert_eq!(
        outputs(&done.state),
        vec![
            "Fast analysis completed: dataset-A - Decision: approved",
            "Slow processing completed: dataset-B (full) - Decision: approved",
        ]
    );
}

#[tokio::test]
async fn edit_and_ignore_answered_separately() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-3");

    let out = graph.invoke(both_tools(), &config, &store).await.unwrap();
    let (fast, slow) = (&out.interrupts[0], &out.interrupts[1]);

    let edit = json!({"type": "edit", "args": {"mode": "quick"}});
    let partial = graph
        .invoke(Command::default().with(slow.id.clone(), edit), &config, &store)
        .await
        .unwrap();
    assert_eq!(partial.interrupts, vec![fast.clone()]);

    let done = graph
        .invoke(
            Command::default().with(fast.id.clone(), json!({"type": "ignore"})),
            &config,
            &store,
        )
        .await
        .unwrap();
    assert_eq!(
        outputs(&done.state),
        vec![
            "Fast analysis cancelled for: dataset-A",
            "Slow processing completed: dataset-B (quick) - Decision: modified",
        ]
    );
}

#[tokio::test]
async fn plain_resume_value_counts_as_accept() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-4");

    let out = graph.invoke(both_tools(), &config, &store).await.unwrap();
    let command = Command::resume(out.interrupts.iter().map(|i| (i.id.clone(), json!("yes"))));
    let done = graph.invoke(command, &config, &store).await.unwrap();
    assert!(outputs(&done.state).iter().all(|o| o.ends_with("Decision: approved")));
}

#[tokio::test]
async fn disallowed_response_fails_the_task() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-5");

    let out = graph.invoke(both_tools(), &config, &store).await.unwrap();
    let fast = &out.interrupts[0];
    let err = graph
        .invoke(
            Command::default().with(fast.id.clone(), json!({"type": "response", "content": "hm"})),
            &config,
            &store,
        )
        .await
        .unwrap_err();

    match err {
        LatchError::Graph(GraphError::NodeExecution { node, source, .. }) => {
            assert_eq!(node, FAST_ANALYSIS);
            assert!(source.to_string().contains("'response' is not allowed"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The failed resume wrote nothing, so both requests are still pending.
    let pending = graph.pending_interrupts("inbox-5", &store).await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn unknown_tool_is_rejected_by_planner() {
    let store = MemoryCheckpointStore::new();
    let graph = instant_graph();
    let config = RunConfig::new().with_thread_id("inbox-6");

    let err = graph
        .invoke(json!({"tool_calls": [{"tool": "rm_rf", "args": {}}]}), &config, &store)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown tool 'rm_rf'"));
}
