use futures::StreamExt;
use tokio::time::{self, Duration, Instant};

use super::TurnContext;
use crate::assembly::{AssemblyUpdate, StreamEventAssembler};
use crate::error::ParleyError;
use crate::orchestrator::ConversationEvent;
use crate::provider::ModelRequest;
use crate::types::{Message, StopReason, StreamEvent};

pub(super) enum StreamPhaseOutcome {
    Finished {
        message: Message,
        stop_reason: StopReason,
    },
    Canceled,
    Failed(ParleyError),
}

/// Stream one model reply into history.
///
/// The assistant message is appended as soon as `MessageStop` arrives; the
/// stream is then drained for trailing usage metadata.
pub(super) async fn run_stream_phase(
    ctx: &TurnContext<'_>,
    request: &ModelRequest,
    tool_rounds_exhausted: bool,
) -> StreamPhaseOutcome {
    let orchestrator = ctx.orchestrator;
    let request_token = ctx.cancel.child_token();
    // Dropping the guard releases the transport on every exit path.
    let _release = request_token.clone().drop_guard();

    let opened = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return StreamPhaseOutcome::Canceled,
        opened = orchestrator.collaborators.client.stream(request, request_token) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) if ctx.cancel.is_cancelled() => {
            tracing::debug!(error = %err, "stream open interrupted by cancel");
            return StreamPhaseOutcome::Canceled;
        }
        Err(err) => return StreamPhaseOutcome::Failed(err),
    };

    let idle_timeout_ms = orchestrator.config.idle_timeout_ms();
    let mut idle_sleep = Box::pin(time::sleep(Duration::from_millis(
        idle_timeout_ms.unwrap_or(0),
    )));
    let mut assembler = StreamEventAssembler::new();
    let mut finished: Option<(Message, StopReason)> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                if ends_turn(&finished) {
                    tracing::debug!(turn_id = %ctx.turn_id, "cancel after final reply ignored");
                    break;
                }
                if finished.is_none() {
                    keep_partial(ctx, &mut assembler).await;
                }
                return StreamPhaseOutcome::Canceled;
            }
            _ = &mut idle_sleep, if idle_timeout_ms.is_some() => {
                if finished.is_some() {
                    tracing::debug!("no trailing metadata before idle timeout");
                    break;
                }
                return StreamPhaseOutcome::Failed(ParleyError::Timeout(
                    idle_timeout_ms.unwrap_or_default(),
                ));
            }
            next = stream.next() => next,
        };
        let Some(next) = next else { break };
        if let Some(ms) = idle_timeout_ms {
            idle_sleep
                .as_mut()
                .reset(Instant::now() + Duration::from_millis(ms));
        }

        let event = match next {
            Ok(event) => event,
            Err(_) if ctx.cancel.is_cancelled() => {
                if ends_turn(&finished) {
                    break;
                }
                if finished.is_none() {
                    keep_partial(ctx, &mut assembler).await;
                }
                return StreamPhaseOutcome::Canceled;
            }
            Err(err) => {
                // Nobody asked for this abort.
                let err = if err.is_cancellation() {
                    ParleyError::transport("stream aborted by the transport")
                } else {
                    err
                };
                if finished.is_some() {
                    tracing::warn!(error = %err, "stream error after message_stop ignored");
                    break;
                }
                return StreamPhaseOutcome::Failed(err);
            }
        };

        if finished.is_some() && !matches!(event, StreamEvent::Metadata { .. }) {
            tracing::debug!("ignoring stream event after message_stop");
            continue;
        }

        let updates = match assembler.push(event) {
            Ok(updates) => updates,
            Err(err) => {
                if finished.is_some() {
                    tracing::warn!(error = %err, "malformed trailing event ignored");
                    break;
                }
                return StreamPhaseOutcome::Failed(err);
            }
        };

        for update in updates {
            match update {
                AssemblyUpdate::MessageStarted { message_id, .. } => {
                    orchestrator
                        .events
                        .emit(ConversationEvent::MessageStarted { message_id });
                }
                AssemblyUpdate::MessageFinalized {
                    message,
                    stop_reason,
                } => {
                    if stop_reason.requests_tools() && message.has_tool_use() && tool_rounds_exhausted
                    {
                        return StreamPhaseOutcome::Failed(ParleyError::RecursionLimitExceeded {
                            limit: orchestrator.config.max_recursion_depth,
                        });
                    }
                    let message = finalize_message(ctx, message).await;
                    finished = Some((message, stop_reason));
                }
                AssemblyUpdate::UsagePatch { message_id, usage } => {
                    orchestrator.patch_usage(&message_id, usage).await;
                }
                delta => publish_delta(ctx, &assembler, delta),
            }
        }
    }

    match finished {
        Some((message, stop_reason)) => StreamPhaseOutcome::Finished {
            message,
            stop_reason,
        },
        None if ctx.cancel.is_cancelled() => {
            keep_partial(ctx, &mut assembler).await;
            StreamPhaseOutcome::Canceled
        }
        None => StreamPhaseOutcome::Failed(ParleyError::protocol(
            "stream ended before message_stop",
        )),
    }
}

/// A finalized reply that asks for no tools already completes the turn.
fn ends_turn(finished: &Option<(Message, StopReason)>) -> bool {
    finished.as_ref().is_some_and(|(message, stop_reason)| {
        !stop_reason.requests_tools() || !message.has_tool_use()
    })
}

/// Price, stamp and append a finalized assistant message.
async fn finalize_message(ctx: &TurnContext<'_>, mut message: Message) -> Message {
    let orchestrator = ctx.orchestrator;
    let usage = message.usage().cloned();
    let metadata = message.metadata_mut();
    metadata.model_id = Some(orchestrator.config.model_id.clone());
    if let Some(usage) = usage {
        let cost = orchestrator.price(&usage);
        metadata.cost = cost;
        orchestrator.lock_state().totals.record(&usage, cost);
    }
    orchestrator.append_message(message.clone()).await;
    message
}

/// Keep what the model produced before cancellation.
async fn keep_partial(ctx: &TurnContext<'_>, assembler: &mut StreamEventAssembler) {
    if let Some(partial) = assembler.take_partial() {
        tracing::debug!(
            turn_id = %ctx.turn_id,
            blocks = partial.content.len(),
            "keeping partial message after cancel"
        );
        ctx.orchestrator.append_message(partial).await;
    }
}

fn publish_delta(ctx: &TurnContext<'_>, assembler: &StreamEventAssembler, delta: AssemblyUpdate) {
    let events = &ctx.orchestrator.events;
    if !events.has_subscribers() {
        return;
    }
    if let AssemblyUpdate::ToolUseStarted {
        message_id,
        tool_use_id,
        name,
    } = &delta
    {
        events.emit(ConversationEvent::ToolUseStarted {
            message_id: message_id.clone(),
            tool_use_id: tool_use_id.clone(),
            name: name.clone(),
        });
    }
    if let Some(snapshot) = assembler.snapshot() {
        events.emit(ConversationEvent::MessageUpdate { snapshot, delta });
    }
}
