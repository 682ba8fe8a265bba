//! Token-budgeted history trimming and cache-point placement.

use crate::types::{ContentBlock, Message, Role, ToolResultContent};

const MESSAGE_OVERHEAD_TOKENS: usize = 4;
const STRUCTURED_BLOCK_OVERHEAD_TOKENS: usize = 8;

/// History window selected for one model request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrimmedContext {
    pub messages: Vec<Message>,
    /// Index into `messages` that should carry a cache marker.
    pub cache_point_index: Option<usize>,
    /// Number of leading history messages left out of the window.
    pub dropped: usize,
}

pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS;
    for block in &message.content {
        tokens += match block {
            ContentBlock::Text { text } => estimate_text_tokens(text),
            ContentBlock::Reasoning { text, signature } => {
                estimate_text_tokens(text)
                    + signature.as_deref().map(estimate_text_tokens).unwrap_or(0)
            }
            ContentBlock::Redacted { data } => estimate_text_tokens(data),
            ContentBlock::ToolUse(tool_use) => {
                let input = tool_use.input.to_string();
                estimate_text_tokens(&tool_use.name)
                    + estimate_text_tokens(&input)
                    + STRUCTURED_BLOCK_OVERHEAD_TOKENS
            }
            ContentBlock::ToolResult(result) => {
                let payload = match &result.content {
                    ToolResultContent::Text(text) => estimate_text_tokens(text),
                    ToolResultContent::Json(value) => estimate_text_tokens(&value.to_string()),
                };
                estimate_text_tokens(&result.tool_use_id)
                    + payload
                    + STRUCTURED_BLOCK_OVERHEAD_TOKENS
            }
            ContentBlock::CachePoint => 0,
        };
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Select the newest whole messages that fit in `token_budget`.
///
/// When anything is dropped the window is advanced past leading assistant
/// messages and tool-result-only user messages, so it always opens on a user
/// turn and never carries a result whose tool use was cut.
pub fn trim_history(
    history: &[Message],
    token_budget: usize,
    previous_cache_point: Option<usize>,
    caching_enabled: bool,
) -> TrimmedContext {
    let mut remaining = estimate_messages_tokens(history);
    let mut start = 0usize;
    while start < history.len() && remaining > token_budget {
        remaining -= estimate_message_tokens(&history[start]);
        start += 1;
    }
    if start > 0 {
        while start < history.len()
            && (history[start].role == Role::Assistant || history[start].is_tool_result_only())
        {
            start += 1;
        }
    }

    let messages = history[start..].to_vec();
    let cache_point_index = if caching_enabled {
        select_cache_point(&messages, previous_cache_point, start > 0)
    } else {
        None
    };
    TrimmedContext {
        messages,
        cache_point_index,
        dropped: start,
    }
}

/// Tokens needed by the smallest window [`trim_history`] can return: the
/// suffix opening on the newest user turn, or all of `history` when it has none.
pub fn minimum_window_tokens(history: &[Message]) -> usize {
    let start = newest_user_turn(history).unwrap_or(0);
    estimate_messages_tokens(&history[start..])
}

fn select_cache_point(
    messages: &[Message],
    previous: Option<usize>,
    trimmed: bool,
) -> Option<usize> {
    // Tool rounds never move the boundary; only a new human turn does. An
    // index at or past the newest user turn is stale and is replaced.
    let selected = newest_user_turn(messages).and_then(|index| index.checked_sub(1));
    if selected != previous {
        tracing::debug!(
            previous = ?previous,
            next = ?selected,
            trimmed,
            "cache point moved"
        );
    }
    selected
}

/// Index of the newest user message typed by a person (not a tool-result carrier).
fn newest_user_turn(messages: &[Message]) -> Option<usize> {
    messages
        .iter()
        .rposition(|message| message.role == Role::User && !message.is_tool_result_only())
}

/// Mark `index` as the end of the cacheable prefix of an outgoing request.
///
/// Operates on the request copy; stored history never carries cache markers.
pub fn apply_cache_point(messages: &mut [Message], index: Option<usize>) {
    let Some(message) = index.and_then(|index| messages.get_mut(index)) else {
        return;
    };
    if !matches!(message.content.last(), Some(ContentBlock::CachePoint)) {
        message.content.push(ContentBlock::CachePoint);
    }
}
