//! Conversation orchestrator: drives one session turn by turn.
//!
//! A turn appends the user input, then loops: trim history into a request,
//! stream the model's reply through the [`StreamEventAssembler`], and when the
//! model asks for tools, run them through the [`ToolDispatcher`] and feed the
//! results back. The loop is bounded by
//! [`OrchestratorConfig::max_recursion_depth`] tool rounds.
//!
//! Cancellation ([`ConversationOrchestrator::cancel`]) is a normal outcome:
//! whatever was generated is kept, tool results that arrive late are dropped,
//! and history is pruned so every tool use has its result.
//!
//! [`StreamEventAssembler`]: crate::assembly::StreamEventAssembler

mod control;
mod engine;
pub mod events;
pub mod state;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bon::Builder;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{ParleyError, Result};
use crate::persistence::{InMemoryPersistence, MessagePatch, MessagePersistence};
use crate::pricing::{CostTable, PricingTable};
use crate::provider::ModelStreamClient;
use crate::tools::{GuardrailChecker, GuardrailDirection, ToolDispatcher, ToolExecutor, ToolRegistry};
use crate::types::{Message, SessionTotals, Usage};

use control::EventEmitter;
pub use events::{ConversationEvent, TurnStatus};
pub use state::{prune_orphans, sanitize_history, ConversationState, OrchestratorState};

/// Services the orchestrator talks to.
///
/// Example:
/// ```no_run
/// # use std::sync::Arc;
/// # use parley::orchestrator::Collaborators;
/// # use parley::provider::ModelStreamClient;
/// # fn client() -> Arc<dyn ModelStreamClient> { unimplemented!() }
/// let collaborators = Collaborators::builder().client(client()).build();
/// ```
#[derive(Clone, Builder)]
pub struct Collaborators {
    pub client: Arc<dyn ModelStreamClient>,
    #[builder(default = Arc::new(ToolRegistry::new()) as Arc<dyn ToolExecutor>)]
    pub tools: Arc<dyn ToolExecutor>,
    pub guardrail: Option<Arc<dyn GuardrailChecker>>,
    #[builder(default = Arc::new(InMemoryPersistence::new()) as Arc<dyn MessagePersistence>)]
    pub persistence: Arc<dyn MessagePersistence>,
    #[builder(default = Arc::new(PricingTable::with_defaults()) as Arc<dyn CostTable>)]
    pub cost_table: Arc<dyn CostTable>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("guardrail", &self.guardrail.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of a successfully handled `submit`.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model finished its turn; `message` is the final assistant reply.
    Completed { message: Message },
    /// The turn was canceled; history keeps whatever was consistent.
    Canceled,
    /// The input guardrail intervened; `message` carries the remediation.
    Blocked { message: Message },
}

impl TurnOutcome {
    pub fn status(&self) -> TurnStatus {
        match self {
            Self::Completed { .. } => TurnStatus::Completed,
            Self::Canceled => TurnStatus::Canceled,
            Self::Blocked { .. } => TurnStatus::Blocked,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Completed { message } | Self::Blocked { message } => Some(message),
            Self::Canceled => None,
        }
    }
}

/// Drives a single conversation session.
///
/// Share it behind an `Arc` to call [`cancel`](Self::cancel) while a
/// [`submit`](Self::submit) is running on another task. Turns are strictly
/// sequential: a second `submit` during a turn is rejected.
pub struct ConversationOrchestrator {
    session_id: String,
    config: OrchestratorConfig,
    collaborators: Collaborators,
    dispatcher: ToolDispatcher,
    state: Mutex<ConversationState>,
    cancel_token: Mutex<CancellationToken>,
    turn_lock: tokio::sync::Mutex<()>,
    events: EventEmitter,
}

impl ConversationOrchestrator {
    /// Start a fresh session with a generated id.
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Result<Self> {
        Self::build(
            config,
            collaborators,
            Uuid::new_v4().to_string(),
            ConversationState::default(),
        )
    }

    /// Continue a stored session. Orphaned tool uses and results are pruned
    /// from `history` (and removed from persistence) first.
    pub async fn resume(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        session_id: impl Into<String>,
        history: Vec<Message>,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let (messages, removed) = sanitize_history(history);
        let orchestrator = Self::build(
            config,
            collaborators,
            session_id,
            ConversationState::with_history(messages),
        )?;
        if !removed.is_empty() {
            tracing::info!(
                session_id = %orchestrator.session_id,
                removed = removed.len(),
                "pruned inconsistent messages from resumed history"
            );
            orchestrator.forget_messages(removed).await;
        }
        Ok(orchestrator)
    }

    fn build(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        session_id: String,
        state: ConversationState,
    ) -> Result<Self> {
        config.validate()?;
        let mut dispatcher = ToolDispatcher::new(collaborators.tools.clone())
            .with_max_concurrency(config.max_tool_concurrency);
        if config.guardrails.check_tool_output {
            if let Some(guardrail) = collaborators.guardrail.clone() {
                dispatcher = dispatcher.with_output_guardrail(guardrail);
            }
        }
        Ok(Self {
            session_id,
            config,
            collaborators,
            dispatcher,
            state: Mutex::new(state),
            cancel_token: Mutex::new(CancellationToken::new()),
            turn_lock: tokio::sync::Mutex::new(()),
            events: EventEmitter::new(),
        })
    }

    /// Hand the collaborators to a new session, ending this one.
    ///
    /// Any in-flight turn is canceled. Cache point, token and counters start
    /// fresh; everything already finalized was persisted as it happened.
    pub async fn switch_session(
        self,
        session_id: impl Into<String>,
        history: Vec<Message>,
    ) -> Result<Self> {
        self.cancel();
        let _turn = self.turn_lock.lock().await;
        tracing::info!(from = %self.session_id, "switching session");
        Self::resume(
            self.config.clone(),
            self.collaborators.clone(),
            session_id,
            history,
        )
        .await
    }

    /// Run one user turn to completion, cancellation or failure.
    ///
    /// Terminal failures return `Err` after an error message is appended to
    /// history; cancellation returns `Ok(TurnOutcome::Canceled)`.
    pub async fn submit(&self, input: impl Into<String>) -> Result<TurnOutcome> {
        let Ok(_turn) = self.turn_lock.try_lock() else {
            return Err(ParleyError::InvalidState(
                "a turn is already in progress for this session".to_string(),
            ));
        };
        let turn_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        *self.cancel_token.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        tracing::info!(
            session_id = %self.session_id,
            turn_id = %turn_id,
            model = %self.config.model_id,
            "turn start"
        );
        self.events.emit(ConversationEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });

        let mut user_message = Message::user(input);
        if let Some(outcome) = self.check_input(&turn_id, &mut user_message).await {
            return Ok(outcome);
        }
        self.append_message(user_message).await;

        engine::run_turn(engine::TurnContext {
            orchestrator: self,
            turn_id: &turn_id,
            cancel: &token,
        })
        .await
    }

    /// Cancel the in-flight turn, if any. Safe to call at any time.
    pub fn cancel(&self) {
        let token = self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !token.is_cancelled() {
            tracing::debug!(session_id = %self.session_id, "cancel requested");
        }
        token.cancel();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        self.lock_state().state
    }

    /// Copy of the full history, error messages included.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().messages.clone()
    }

    pub fn totals(&self) -> SessionTotals {
        self.lock_state().totals.clone()
    }

    pub fn cache_point_index(&self) -> Option<usize> {
        self.lock_state().cache_point_index
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Event stream for this session; lagged events are skipped.
    pub fn events(&self) -> impl Stream<Item = ConversationEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(error = %err, "conversation event subscriber lagged");
                    None
                }
            }
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, to: OrchestratorState) {
        let from = {
            let mut state = self.lock_state();
            std::mem::replace(&mut state.state, to)
        };
        if from != to {
            self.events
                .emit(ConversationEvent::StateChanged { from, to });
        }
    }

    /// Guardrail check on user input. Returns the outcome when the turn must
    /// stop here.
    async fn check_input(&self, turn_id: &str, user_message: &mut Message) -> Option<TurnOutcome> {
        if !self.config.guardrails.check_input {
            return None;
        }
        let guardrail = self.collaborators.guardrail.as_ref()?;
        let assessment = match guardrail
            .check(GuardrailDirection::Input, &user_message.text())
            .await
        {
            Ok(assessment) => assessment,
            Err(err) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "input guardrail check failed; continuing"
                );
                return None;
            }
        };
        if !assessment.intervened {
            return None;
        }

        tracing::info!(session_id = %self.session_id, turn_id, "input blocked by guardrail");
        let remediation = assessment
            .remediation
            .unwrap_or_else(|| "Your message was blocked by a content guardrail.".to_string());
        // Neither message is ever sent to the model.
        user_message.metadata_mut().error = Some("blocked by guardrail".to_string());
        self.append_message(user_message.clone()).await;
        let reply = Message::error(remediation);
        self.append_message(reply.clone()).await;
        self.set_state(OrchestratorState::Finalized);
        self.events.emit(ConversationEvent::TurnFinished {
            turn_id: turn_id.to_string(),
            status: TurnStatus::Blocked,
        });
        Some(TurnOutcome::Blocked { message: reply })
    }

    async fn append_message(&self, message: Message) {
        self.lock_state().messages.push(message.clone());
        self.events.emit(ConversationEvent::MessageAppended {
            message: message.clone(),
        });
        if let Err(err) = self
            .collaborators
            .persistence
            .append(&self.session_id, &message)
            .await
        {
            self.persistence_failed(&message.id, err);
        }
    }

    /// Record usage reported after a message was finalized.
    async fn patch_usage(&self, message_id: &str, usage: Usage) {
        let cost = self.price(&usage);
        let patch = MessagePatch {
            usage: Some(usage.clone()),
            cost,
            stop_reason: None,
        };
        let found = {
            let mut state = self.lock_state();
            let first_report = match state.message_mut(message_id) {
                Some(message) => {
                    let first_report = message.usage().is_none();
                    patch.apply_to(message);
                    Some(first_report)
                }
                None => None,
            };
            if first_report == Some(true) {
                state.totals.record(&usage, cost);
            }
            first_report.is_some()
        };
        if !found {
            tracing::debug!(message_id, "usage for a message no longer in history");
            return;
        }
        self.events.emit(ConversationEvent::MessagePatched {
            message_id: message_id.to_string(),
            patch: patch.clone(),
        });
        if let Err(err) = self
            .collaborators
            .persistence
            .update(&self.session_id, message_id, &patch)
            .await
        {
            self.persistence_failed(message_id, err);
        }
    }

    /// Drop orphaned tool uses from history and from persistence.
    async fn prune_history(&self) {
        let removed = prune_orphans(&mut self.lock_state().messages);
        if !removed.is_empty() {
            self.forget_messages(removed).await;
        }
    }

    async fn forget_messages(&self, message_ids: Vec<String>) {
        self.events.emit(ConversationEvent::HistoryPruned {
            message_ids: message_ids.clone(),
        });
        for message_id in &message_ids {
            if let Err(err) = self
                .collaborators
                .persistence
                .remove(&self.session_id, message_id)
                .await
            {
                self.persistence_failed(message_id, err);
            }
        }
    }

    fn persistence_failed(&self, message_id: &str, err: ParleyError) {
        tracing::warn!(
            session_id = %self.session_id,
            message_id,
            error = %err,
            "message persistence failed"
        );
        self.events.emit(ConversationEvent::PersistenceFailed {
            message_id: message_id.to_string(),
            error: err.to_string(),
        });
    }

    fn price(&self, usage: &Usage) -> Option<f64> {
        self.collaborators.cost_table.price(
            &self.config.model_id,
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_read_tokens,
            usage.cache_write_tokens,
        )
    }
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("session_id", &self.session_id)
            .field("model_id", &self.config.model_id)
            .field("state", &self.state())
            .finish()
    }
}
