//! Shared test helpers and a queued model client.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parley::error::ParleyError;
use parley::provider::{EventStream, ModelRequest, ModelStreamClient};
use parley::types::*;

/// A model client that replays queued turns in order.
pub struct QueuedClient {
    turns: Mutex<Vec<Vec<StreamEvent>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl QueuedClient {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text reply.
    pub fn queue_text(&self, text: &str, usage: Usage) {
        self.queue(vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart { tool_use: None },
            StreamEvent::text(text),
            StreamEvent::ContentBlockStop,
            StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            },
            StreamEvent::Metadata { usage },
        ]);
    }

    /// Queue a reply requesting a single tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, input: serde_json::Value) {
        self.queue(vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::tool_use_start(id, name),
            StreamEvent::tool_input(input.to_string()),
            StreamEvent::ContentBlockStop,
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolUse,
            },
            StreamEvent::Metadata {
                usage: Usage::new(10, 5),
            },
        ]);
    }

    pub fn queue(&self, events: Vec<StreamEvent>) {
        self.turns.lock().unwrap().push(events);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelStreamClient for QueuedClient {
    async fn stream(
        &self,
        request: &ModelRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream, ParleyError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err(ParleyError::transport("no queued turn"));
        }
        let events = turns.remove(0);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}
