use super::TurnContext;
use crate::orchestrator::ConversationEvent;
use crate::types::{Message, ToolUse};

pub(super) enum ToolPhaseOutcome {
    Continue,
    Canceled,
}

/// Run the tool uses of `message` and append their results.
///
/// Tools that already started are allowed to finish after a cancel; their
/// results are then discarded so history only holds what the model asked for
/// and saw answered.
pub(super) async fn run_tool_phase(ctx: &TurnContext<'_>, message: &Message) -> ToolPhaseOutcome {
    let orchestrator = ctx.orchestrator;
    if ctx.cancel.is_cancelled() {
        return ToolPhaseOutcome::Canceled;
    }

    let tool_uses: Vec<ToolUse> = message.tool_uses().into_iter().cloned().collect();
    for tool_use in &tool_uses {
        tracing::debug!(
            turn_id = %ctx.turn_id,
            tool_use_id = %tool_use.tool_use_id,
            tool = %tool_use.name,
            "tool execution start"
        );
        orchestrator
            .events
            .emit(ConversationEvent::ToolExecutionStarted {
                tool_use_id: tool_use.tool_use_id.clone(),
                name: tool_use.name.clone(),
                input: tool_use.input.clone(),
            });
    }

    let events = &orchestrator.events;
    let results = orchestrator
        .dispatcher
        .dispatch_observed(&tool_uses, |tool_use, result| {
            events.emit(ConversationEvent::ToolExecutionFinished {
                tool_use_id: tool_use.tool_use_id.clone(),
                name: tool_use.name.clone(),
                result: result.clone(),
            });
        })
        .await;

    if ctx.cancel.is_cancelled() {
        tracing::debug!(
            turn_id = %ctx.turn_id,
            discarded = results.len(),
            "discarding tool results after cancel"
        );
        return ToolPhaseOutcome::Canceled;
    }

    let failures = results.iter().filter(|result| result.is_error()).count();
    if failures > 0 {
        tracing::debug!(turn_id = %ctx.turn_id, failures, "tool batch had failures");
    }
    orchestrator
        .append_message(Message::tool_results(results))
        .await;
    ToolPhaseOutcome::Continue
}
