use latch_core::error::Result;
use latch_graph::context::NodeContext;

use crate::error::InboxError;
use crate::types::{ActionRequest, HumanInterrupt, HumanInterruptConfig, HumanResponse};

/// Ask a human to approve `action_request` and wait for the answer.
///
/// The first call suspends the task with a [`HumanInterrupt`] payload whose
/// `id` is the interrupt id. Once a resume value exists for this call site
/// it is parsed and checked against `config`.
pub fn request_human(
    ctx: &NodeContext,
    action_request: ActionRequest,
    config: HumanInterruptConfig,
    description: impl Into<String>,
) -> Result<HumanResponse> {
    let action = action_request.action.clone();
    let request = HumanInterrupt {
        id: ctx.next_interrupt_id(),
        action_request,
        config,
        description: description.into(),
    };
    let payload = serde_json::to_value(&request)?;
    let raw = ctx.suspend(payload)?;

    let response = HumanResponse::from_resume(raw)?;
    if !request.config.allows(&response) {
        tracing::warn!(action = %action, kind = response.kind(), "human response rejected");
        return Err(InboxError::ResponseNotAllowed {
            action,
            kind: response.kind().to_string(),
        }
        .into());
    }
    tracing::info!(
        action = %action,
        kind = response.kind(),
        interrupt_id = %request.id,
        "human responded"
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn request() -> ActionRequest {
        let mut args = Map::new();
        args.insert("data".into(), json!("x"));
        ActionRequest::new("fast_analysis", args)
    }

    #[test]
    fn detached_context_suspends_with_payload() {
        let ctx = NodeContext::detached("fast_analysis");
        let expected_id = ctx.next_interrupt_id();
        let err = request_human(&ctx, request(), HumanInterruptConfig::default(), "approve")
            .unwrap_err();
        assert!(err.is_suspended());
        assert!(err.to_string().contains(&expected_id));
    }
}
