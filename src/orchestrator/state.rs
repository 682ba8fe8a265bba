//! Conversation state and history consistency repairs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{ContentBlock, Message, Role, SessionTotals};

/// Lifecycle of the orchestrator between and during turns.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrchestratorState {
    #[default]
    Idle,
    Streaming,
    ToolExecuting,
    Finalized,
    Aborted,
    Failed,
}

impl OrchestratorState {
    /// Whether a turn is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Streaming | Self::ToolExecuting)
    }
}

/// Everything one session owns in memory.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub cache_point_index: Option<usize>,
    pub totals: SessionTotals,
    pub state: OrchestratorState,
}

impl ConversationState {
    pub fn with_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }
}

/// Restore the tool-use/tool-result pairing invariant.
///
/// Assistant messages with a tool use that has no result anywhere later in
/// history are removed whole. Tool-result blocks whose tool use is gone are
/// dropped, and messages left empty by that are removed. Returns the ids of
/// removed messages.
pub fn prune_orphans(messages: &mut Vec<Message>) -> Vec<String> {
    let mut removed = Vec::new();

    let answered: HashSet<String> = messages
        .iter()
        .flat_map(|message| message.tool_result_blocks())
        .map(|result| result.tool_use_id.clone())
        .collect();
    messages.retain(|message| {
        let orphaned = message.role == Role::Assistant
            && message
                .tool_uses()
                .iter()
                .any(|tool_use| !answered.contains(&tool_use.tool_use_id));
        if orphaned {
            removed.push(message.id.clone());
        }
        !orphaned
    });

    let requested: HashSet<String> = messages
        .iter()
        .flat_map(|message| message.tool_uses())
        .map(|tool_use| tool_use.tool_use_id.clone())
        .collect();
    messages.retain_mut(|message| {
        let before = message.content.len();
        message.content.retain(|block| match block {
            ContentBlock::ToolResult(result) => requested.contains(&result.tool_use_id),
            _ => true,
        });
        let emptied = before > 0 && message.content.is_empty();
        if emptied {
            removed.push(message.id.clone());
        }
        !emptied
    });

    removed
}

/// Prepare stored history for a resumed session.
pub fn sanitize_history(mut messages: Vec<Message>) -> (Vec<Message>, Vec<String>) {
    let removed = prune_orphans(&mut messages);
    (messages, removed)
}
