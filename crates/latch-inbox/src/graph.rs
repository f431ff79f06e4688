use latch_checkpoint::prelude::SendDirective;
use latch_core::error::{LatchError, Result};
use latch_graph::prelude::*;
use serde_json::{Value, json};

use crate::error::InboxError;
use crate::tools::{
    FAST_ANALYSIS, SLOW_PROCESSING, ToolSettings, fast_analysis_node, slow_processing_node,
};

/// Channel holding the requested calls: `[{"tool": ..., "args": {...}}]`.
pub const TOOL_CALLS: &str = "tool_calls";
/// Channel collecting `{"tool", "output"}` entries from finished tools.
pub const TOOL_RESULTS: &str = "results";

const PLANNER: &str = "planner";

fn calls(state: &Value) -> Vec<Value> {
    state[TOOL_CALLS].as_array().cloned().unwrap_or_default()
}

/// Build the tool-calling graph.
///
/// `planner` checks the requested calls, then every call is sent to its
/// tool node so all of them run in the same superstep. Each tool suspends
/// for approval independently.
pub fn build_tool_graph(settings: ToolSettings) -> Result<CompiledStateGraph> {
    let mut graph = StateGraph::new();
    graph.add_last_value_channel(TOOL_CALLS, json!([]));
    graph.add_append_channel(TOOL_RESULTS);

    graph.add_node(NodeFn::new(PLANNER, |state: Value, _ctx| async move {
        for call in calls(&state) {
            let tool = call["tool"].as_str().unwrap_or_default();
            if tool != FAST_ANALYSIS && tool != SLOW_PROCESSING {
                return Err(LatchError::from(InboxError::UnknownTool(tool.to_string())));
            }
        }
        tracing::info!(calls = calls(&state).len(), "dispatching tool calls");
        Ok(json!({}))
    }))?;

    let fast_settings = settings.clone();
    graph.add_node(NodeFn::new(FAST_ANALYSIS, move |input: Value, ctx| {
        fast_analysis_node(fast_settings.clone(), input, ctx)
    }))?;
    graph.add_node(NodeFn::new(SLOW_PROCESSING, move |input: Value, ctx| {
        slow_processing_node(settings.clone(), input, ctx)
    }))?;

    graph.set_entry_point(PLANNER);
    graph.add_conditional_edges(ConditionalEdge::fan_out(
        PLANNER,
        |state: &Value| {
            calls(state)
                .into_iter()
                .filter_map(|call| {
                    let tool = call["tool"].as_str()?.to_string();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    Some(SendDirective::new(tool, args))
                })
                .collect()
        },
        [FAST_ANALYSIS, SLOW_PROCESSING],
    ));
    graph.add_edge(FAST_ANALYSIS, END);
    graph.add_edge(SLOW_PROCESSING, END);
    graph.compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_compiles_with_both_tools() {
        let graph = build_tool_graph(ToolSettings::default()).unwrap();
        let mut names = graph.node_names();
        names.sort();
        assert_eq!(names, vec![FAST_ANALYSIS, PLANNER, SLOW_PROCESSING]);
        assert!(graph.has_channel(TOOL_CALLS));
        assert!(graph.has_channel(TOOL_RESULTS));
    }
}
