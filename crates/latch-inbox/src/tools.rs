//! Two demonstration tools that each need human approval before finishing.

use std::time::Duration;

use latch_core::error::Result;
use latch_graph::context::NodeContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::request::request_human;
use crate::types::{ActionRequest, HumanInterruptConfig, HumanResponse};

pub const FAST_ANALYSIS: &str = "fast_analysis";
pub const SLOW_PROCESSING: &str = "slow_processing";

const DEFAULT_DELAY_MS: u64 = 2000;
const DEFAULT_MODE: &str = "full";
const DELAY_ENV: &str = "LATCH_TOOL_DELAY_MS";

/// Settings shared by the tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// How long each tool works before asking for approval.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl ToolSettings {
    /// Read `LATCH_TOOL_DELAY_MS`, falling back to the default.
    pub fn from_env() -> Self {
        let delay_ms = std::env::var(DELAY_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_DELAY_MS);
        Self { delay_ms }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

/// Analyse `data`, then wait for a human to approve the result.
pub async fn fast_analysis(
    ctx: &NodeContext,
    settings: &ToolSettings,
    data: &str,
) -> Result<String> {
    tracing::info!(data, delay_ms = settings.delay_ms, "fast analysis started");
    tokio::time::sleep(settings.delay()).await;

    let request = ActionRequest::new(FAST_ANALYSIS, args(&[("data", data)]));
    let description =
        format!("Fast analysis tool needs approval to complete analysis of: {data}.");
    let response = request_human(ctx, request, HumanInterruptConfig::default(), description)?;

    let output = match response {
        HumanResponse::Ignore => {
            tracing::warn!(data, "fast analysis cancelled");
            format!("Fast analysis cancelled for: {data}")
        }
        _ => format!("Fast analysis completed: {data} - Decision: approved"),
    };
    Ok(output)
}

/// Process `data` in `mode`. An edit may switch the mode.
pub async fn slow_processing(
    ctx: &NodeContext,
    settings: &ToolSettings,
    data: &str,
    mode: &str,
) -> Result<String> {
    tracing::info!(data, mode, delay_ms = settings.delay_ms, "slow processing started");
    tokio::time::sleep(settings.delay()).await;

    let request = ActionRequest::new(SLOW_PROCESSING, args(&[("data", data), ("mode", mode)]));
    let description =
        format!("Slow processing tool needs approval for {mode} processing of: {data}.");
    let response = request_human(ctx, request, HumanInterruptConfig::default(), description)?;

    let output = match response {
        HumanResponse::Ignore => {
            tracing::warn!(data, "slow processing cancelled");
            format!("Slow processing cancelled for: {data}")
        }
        HumanResponse::Edit { args } => {
            let new_mode = args.get("mode").and_then(Value::as_str).unwrap_or(mode);
            tracing::info!(from = mode, to = new_mode, "processing mode changed");
            format!("Slow processing completed: {data} ({new_mode}) - Decision: modified")
        }
        _ => format!("Slow processing completed: {data} ({mode}) - Decision: approved"),
    };
    Ok(output)
}

fn result(tool: &str, output: String) -> Value {
    json!({ "results": [{ "tool": tool, "output": output }] })
}

/// The tool call a node received, as an [`ActionRequest`]. Non-object input
/// carries no arguments.
fn tool_call(tool: &str, input: Value) -> ActionRequest {
    match input {
        Value::Object(args) => ActionRequest::new(tool, args),
        _ => ActionRequest::new(tool, Map::new()),
    }
}

/// Node body for [`FAST_ANALYSIS`]. Input: `{"data": ...}`.
pub(crate) async fn fast_analysis_node(
    settings: ToolSettings,
    input: Value,
    ctx: NodeContext,
) -> Result<Value> {
    let call = tool_call(FAST_ANALYSIS, input);
    let data = call.require_str("data")?;
    let output = fast_analysis(&ctx, &settings, data).await?;
    Ok(result(FAST_ANALYSIS, output))
}

/// Node body for [`SLOW_PROCESSING`]. Input: `{"data": ..., "mode": ...}`.
pub(crate) async fn slow_processing_node(
    settings: ToolSettings,
    input: Value,
    ctx: NodeContext,
) -> Result<Value> {
    let call = tool_call(SLOW_PROCESSING, input);
    let data = call.require_str("data")?;
    let mode = call.arg_str("mode").unwrap_or(DEFAULT_MODE);
    let output = slow_processing(&ctx, &settings, data, mode).await?;
    Ok(result(SLOW_PROCESSING, output))
}
