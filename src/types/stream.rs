//! Streaming protocol events.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::Role;
use super::usage::Usage;

/// One event of a streamed model turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        role: Role,
    },
    ContentBlockStart {
        /// Present when the block is a tool invocation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use: Option<ToolUseStart>,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop,
    MessageStop {
        stop_reason: StopReason,
    },
    /// Usage report; may arrive after `MessageStop`.
    Metadata {
        usage: Usage,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            delta: BlockDelta::Text(text.into()),
        }
    }

    pub fn tool_input(fragment: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            delta: BlockDelta::ToolUseInput(fragment.into()),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            delta: BlockDelta::Reasoning(ReasoningDelta::Text(text.into())),
        }
    }

    pub fn tool_use_start(tool_use_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ContentBlockStart {
            tool_use: Some(ToolUseStart {
                tool_use_id: tool_use_id.into(),
                name: name.into(),
            }),
        }
    }
}

/// Identity of a tool-use block announced at block start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseStart {
    pub tool_use_id: String,
    pub name: String,
}

/// Incremental block content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BlockDelta {
    Text(String),
    /// Fragment of the tool input JSON document.
    ToolUseInput(String),
    Reasoning(ReasoningDelta),
}

/// Incremental reasoning content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningDelta {
    Text(String),
    Signature(String),
    Redacted(String),
}

/// Why the model ended its turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    GuardrailIntervened,
    ContentFiltered,
}

impl StopReason {
    /// Whether the model is waiting for tool results.
    pub fn requests_tools(self) -> bool {
        matches!(self, Self::ToolUse)
    }
}
