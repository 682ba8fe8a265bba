use tokio_util::sync::CancellationToken;

use super::control::debug_enabled;
use super::{ConversationEvent, ConversationOrchestrator, OrchestratorState, TurnOutcome, TurnStatus};
use crate::context::{apply_cache_point, minimum_window_tokens, trim_history};
use crate::error::{ParleyError, Result};
use crate::provider::{ModelRequest, SystemBlock, ToolConfig};
use crate::types::Message;

mod stream_phase;
mod tool_phase;

use stream_phase::{run_stream_phase, StreamPhaseOutcome};
use tool_phase::{run_tool_phase, ToolPhaseOutcome};

pub(super) struct TurnContext<'a> {
    pub(super) orchestrator: &'a ConversationOrchestrator,
    pub(super) turn_id: &'a str,
    pub(super) cancel: &'a CancellationToken,
}

pub(super) async fn run_turn(ctx: TurnContext<'_>) -> Result<TurnOutcome> {
    let orchestrator = ctx.orchestrator;
    let limit = orchestrator.config.max_recursion_depth;
    let mut tool_rounds = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(ctx.finish_canceled().await);
        }
        orchestrator.set_state(OrchestratorState::Streaming);
        let request = match build_request(orchestrator) {
            Ok(request) => request,
            Err(err) => return Err(ctx.finish_failed(err).await),
        };

        let mut retried = false;
        let (message, stop_reason) = loop {
            match run_stream_phase(&ctx, &request, tool_rounds >= limit).await {
                StreamPhaseOutcome::Finished {
                    message,
                    stop_reason,
                } => break (message, stop_reason),
                StreamPhaseOutcome::Canceled => return Ok(ctx.finish_canceled().await),
                StreamPhaseOutcome::Failed(err) if err.is_retryable() && !retried => {
                    retried = true;
                    tracing::warn!(
                        session_id = %orchestrator.session_id,
                        turn_id = %ctx.turn_id,
                        depth = tool_rounds,
                        error = %err,
                        "malformed model stream; retrying request once"
                    );
                    orchestrator.events.emit(ConversationEvent::Retrying {
                        turn_id: ctx.turn_id.to_string(),
                        attempt: 2,
                        error: err.to_string(),
                    });
                    orchestrator.events.emit(ConversationEvent::StreamReset {
                        turn_id: ctx.turn_id.to_string(),
                    });
                }
                StreamPhaseOutcome::Failed(err) => return Err(ctx.finish_failed(err).await),
            }
        };

        if debug_enabled() {
            let tool_names = message
                .tool_uses()
                .iter()
                .map(|tool_use| tool_use.name.as_str())
                .collect::<Vec<_>>()
                .join(",");
            tracing::debug!(
                session_id = %orchestrator.session_id,
                turn_id = %ctx.turn_id,
                depth = tool_rounds,
                stop_reason = %stop_reason,
                blocks = message.content.len(),
                tool_names = %tool_names,
                "parley iteration complete"
            );
        }

        if !stop_reason.requests_tools() || !message.has_tool_use() {
            return Ok(ctx.finish_completed(message));
        }

        orchestrator.set_state(OrchestratorState::ToolExecuting);
        match run_tool_phase(&ctx, &message).await {
            ToolPhaseOutcome::Continue => tool_rounds += 1,
            ToolPhaseOutcome::Canceled => return Ok(ctx.finish_canceled().await),
        }
    }
}

/// Assemble the next model request from current history.
fn build_request(orchestrator: &ConversationOrchestrator) -> Result<ModelRequest> {
    let config = &orchestrator.config;
    let messages = {
        let mut state = orchestrator.lock_state();
        let history: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| !message.is_error())
            .cloned()
            .collect();
        let trimmed = trim_history(
            &history,
            config.token_budget,
            state.cache_point_index,
            config.caching_enabled,
        );
        if trimmed.messages.is_empty() {
            return Err(ParleyError::ContextOverflow {
                budget: config.token_budget,
                required: minimum_window_tokens(&history),
            });
        }
        if trimmed.dropped > 0 {
            tracing::debug!(
                session_id = %orchestrator.session_id,
                dropped = trimmed.dropped,
                kept = trimmed.messages.len(),
                "history trimmed to token budget"
            );
        }
        state.cache_point_index = trimmed.cache_point_index;
        let mut messages = trimmed.messages;
        apply_cache_point(&mut messages, trimmed.cache_point_index);
        messages
    };

    let mut system = Vec::new();
    if let Some(prompt) = config.system_prompt.as_ref().filter(|p| !p.is_empty()) {
        system.push(SystemBlock::Text {
            text: prompt.clone(),
        });
        if config.caching_enabled {
            system.push(SystemBlock::CachePoint);
        }
    }

    let tools = orchestrator.collaborators.tools.specs();
    let tool_config = (!tools.is_empty()).then(|| ToolConfig {
        tools,
        cache_point: config.caching_enabled,
    });

    Ok(ModelRequest {
        model_id: config.model_id.clone(),
        messages,
        system,
        tool_config,
        inference_config: config.inference.clone(),
    })
}

impl TurnContext<'_> {
    fn finish_completed(&self, message: Message) -> TurnOutcome {
        let orchestrator = self.orchestrator;
        // Pick up usage that arrived after the stop event.
        let stored = orchestrator.lock_state().message(&message.id).cloned();
        let message = stored.unwrap_or(message);
        orchestrator.set_state(OrchestratorState::Finalized);
        orchestrator.events.emit(ConversationEvent::TurnFinished {
            turn_id: self.turn_id.to_string(),
            status: TurnStatus::Completed,
        });
        tracing::info!(
            session_id = %orchestrator.session_id,
            turn_id = %self.turn_id,
            "turn complete"
        );
        TurnOutcome::Completed { message }
    }

    async fn finish_canceled(&self) -> TurnOutcome {
        let orchestrator = self.orchestrator;
        orchestrator.prune_history().await;
        orchestrator.set_state(OrchestratorState::Aborted);
        orchestrator.set_state(OrchestratorState::Idle);
        orchestrator.events.emit(ConversationEvent::TurnFinished {
            turn_id: self.turn_id.to_string(),
            status: TurnStatus::Canceled,
        });
        tracing::info!(
            session_id = %orchestrator.session_id,
            turn_id = %self.turn_id,
            "turn canceled"
        );
        TurnOutcome::Canceled
    }

    /// Roll history back to a consistent point and record the failure.
    async fn finish_failed(&self, err: ParleyError) -> ParleyError {
        let orchestrator = self.orchestrator;
        tracing::error!(
            session_id = %orchestrator.session_id,
            turn_id = %self.turn_id,
            category = ?err.category(),
            error = %err,
            "turn failed"
        );
        orchestrator.prune_history().await;
        orchestrator
            .append_message(Message::error(err.to_string()))
            .await;
        orchestrator.set_state(OrchestratorState::Failed);
        orchestrator.events.emit(ConversationEvent::Error {
            category: err.category(),
            message: err.to_string(),
        });
        orchestrator.events.emit(ConversationEvent::TurnFinished {
            turn_id: self.turn_id.to_string(),
            status: TurnStatus::Failed,
        });
        err
    }
}
