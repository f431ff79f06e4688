use latch_checkpoint::prelude::*;
use latch_core::config::RunConfig;
use latch_inbox::prelude::*;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const THREAD_ID: &str = "development_session";
const DEFAULT_FILTER: &str =
    "latch_demo=info,latch_graph=info,latch_checkpoint=info,latch_inbox=info";

/// Runs both tools concurrently, shows the pending approvals, then
/// approves everything in one resume.
///
/// Set `LATCH_DB` to keep checkpoints in a SQLite file instead of memory,
/// and `LATCH_TOOL_DELAY_MS` to change how long each tool works.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .init();

    let store: Box<dyn CheckpointStore> = match std::env::var("LATCH_DB") {
        Ok(path) => {
            tracing::info!(path = %path, "using sqlite checkpoint store");
            Box::new(SqliteCheckpointStore::new(path)?)
        }
        Err(_) => Box::new(MemoryCheckpointStore::new()),
    };

    let graph = build_tool_graph(ToolSettings::from_env())?;
    let config = RunConfig::new()
        .with_thread_id(THREAD_ID)
        .with_recursion_limit(50);

    let input = json!({
        "tool_calls": [
            {"tool": FAST_ANALYSIS, "args": {"data": "dataset-A"}},
            {"tool": SLOW_PROCESSING, "args": {"data": "dataset-B", "mode": "full"}},
        ]
    });
    let out = graph.invoke(input, &config, store.as_ref()).await?;

    let snapshot = graph.get_state(THREAD_ID, store.as_ref()).await?;
    let Some(snapshot) = snapshot.filter(|s| !s.interrupts.is_empty()) else {
        println!("Run finished without interrupts: {}", out.into_value());
        return Ok(());
    };

    println!("Paused before: {:?}", snapshot.next);
    for interrupt in &snapshot.interrupts {
        let request: HumanInterrupt = serde_json::from_value(interrupt.value.clone())?;
        println!("  [{}] {}", request.id, request.description);
    }

    println!("Approving every request...");
    let accept = serde_json::to_value(HumanResponse::Accept)?;
    let command = Command::resume(
        snapshot
            .interrupts
            .iter()
            .map(|i| (i.id.clone(), accept.clone())),
    );
    let done = graph.invoke(command, &config, store.as_ref()).await?;

    if let Some(results) = done.state[TOOL_RESULTS].as_array() {
        for result in results {
            println!(
                "  {}: {}",
                result["tool"].as_str().unwrap_or_default(),
                result["output"].as_str().unwrap_or_default()
            );
        }
    }
    tracing::info!(checkpoint_id = %done.checkpoint_id, "run complete");
    Ok(())
}
