//! Events published by the conversation orchestrator.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::state::OrchestratorState;
use crate::assembly::AssemblyUpdate;
use crate::error::ErrorCategory;
use crate::persistence::MessagePatch;
use crate::types::{Message, ToolResult};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Canceled,
    Blocked,
    Failed,
}

/// One observable change in a conversation.
///
/// Subscribers receive every event after they subscribe; slow subscribers
/// that fall behind the channel capacity miss the oldest events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    StateChanged {
        from: OrchestratorState,
        to: OrchestratorState,
    },
    TurnStarted {
        turn_id: String,
    },
    MessageStarted {
        message_id: String,
    },
    /// Live view of the message being streamed.
    MessageUpdate {
        snapshot: Message,
        delta: AssemblyUpdate,
    },
    ToolUseStarted {
        message_id: String,
        tool_use_id: String,
        name: String,
    },
    MessageAppended {
        message: Message,
    },
    MessagePatched {
        message_id: String,
        patch: MessagePatch,
    },
    ToolExecutionStarted {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolExecutionFinished {
        tool_use_id: String,
        name: String,
        result: ToolResult,
    },
    /// A malformed stream is being retried.
    Retrying {
        turn_id: String,
        attempt: u32,
        error: String,
    },
    /// Discard any partial message shown for the failed attempt.
    StreamReset {
        turn_id: String,
    },
    HistoryPruned {
        message_ids: Vec<String>,
    },
    PersistenceFailed {
        message_id: String,
        error: String,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
    TurnFinished {
        turn_id: String,
        status: TurnStatus,
    },
}
