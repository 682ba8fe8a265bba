use super::*;

use serde_json::json;
use tokio::time::{timeout, Duration};

use crate::types::{ContentBlock, Role, StopReason, ToolResultStatus};

mod support;


use support::{
    assert_no_orphans, drain, harness, harness_with, read_files_tool, state_changes, test_config,
    text_turn, tool_use_turn, wait_for, Step, TEST_MODEL,
};

fn tool_result_message_count(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|message| message.is_tool_result_only())
        .count()
}
