//! Incremental assembly of streamed model turns into finalized messages.
//!
//! [`StreamEventAssembler`] consumes one [`StreamEvent`] at a time and reports
//! what changed as [`AssemblyUpdate`]s: live deltas for display, finished
//! blocks, the finalized [`Message`] at `MessageStop`, and usage patches for
//! metadata that trails the stop event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParleyError, Result};
use crate::types::{
    BlockDelta, ContentBlock, Message, MessageMetadata, ReasoningDelta, Role, StopReason,
    StreamEvent, ToolUse, ToolUseStart, Usage,
};

/// Something observable that changed after consuming one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssemblyUpdate {
    MessageStarted {
        message_id: String,
        role: Role,
    },
    TextDelta {
        message_id: String,
        text: String,
    },
    ReasoningDelta {
        message_id: String,
        text: String,
    },
    ToolUseStarted {
        message_id: String,
        tool_use_id: String,
        name: String,
    },
    ToolInputDelta {
        message_id: String,
        tool_use_id: String,
        fragment: String,
    },
    BlockFinalized {
        message_id: String,
        block: ContentBlock,
    },
    MessageFinalized {
        message: Message,
        stop_reason: StopReason,
    },
    /// Usage that arrived after the message was finalized.
    UsagePatch {
        message_id: String,
        usage: Usage,
    },
}

#[derive(Debug, Clone)]
enum OpenBlock {
    Text(String),
    ToolUse {
        tool_use_id: String,
        name: String,
        input: String,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    Redacted(String),
}

impl OpenBlock {
    /// Turn the buffered block into a content block. Empty text-like blocks
    /// produce nothing.
    fn finish(self) -> Option<ContentBlock> {
        match self {
            OpenBlock::Text(text) => (!text.is_empty()).then_some(ContentBlock::Text { text }),
            OpenBlock::ToolUse {
                tool_use_id,
                name,
                input,
            } => Some(ContentBlock::ToolUse(ToolUse {
                input: parse_tool_input(&tool_use_id, &input),
                tool_use_id,
                name,
            })),
            OpenBlock::Reasoning { text, signature } => (!text.is_empty() || signature.is_some())
                .then_some(ContentBlock::Reasoning { text, signature }),
            OpenBlock::Redacted(data) => {
                (!data.is_empty()).then_some(ContentBlock::Redacted { data })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PartialMessage {
    id: String,
    role: Role,
    /// False when the message was opened implicitly by a delta.
    started: bool,
    blocks: Vec<ContentBlock>,
    open: Option<OpenBlock>,
    usage: Option<Usage>,
}

impl PartialMessage {
    fn new(role: Role, started: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            started,
            blocks: Vec::new(),
            open: None,
            usage: None,
        }
    }

    fn close_open_block(&mut self, updates: &mut Vec<AssemblyUpdate>) {
        if let Some(block) = self.open.take().and_then(OpenBlock::finish) {
            self.blocks.push(block.clone());
            updates.push(AssemblyUpdate::BlockFinalized {
                message_id: self.id.clone(),
                block,
            });
        }
    }
}

/// Turns raw stream events into messages and content blocks.
#[derive(Debug, Default)]
pub struct StreamEventAssembler {
    current: Option<PartialMessage>,
    last_finalized: Option<Message>,
    /// Usage seen while no message was open or finalized.
    pending_usage: Option<Usage>,
}

impl StreamEventAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one event.
    ///
    /// Returns a [`ParleyError::Protocol`] for out-of-order events; the
    /// assembler should be [`reset`](Self::reset) before reuse in that case.
    pub fn push(&mut self, event: StreamEvent) -> Result<Vec<AssemblyUpdate>> {
        let mut updates = Vec::new();
        match event {
            StreamEvent::MessageStart { role } => self.on_message_start(role, &mut updates)?,
            StreamEvent::ContentBlockStart { tool_use } => {
                self.on_block_start(tool_use, &mut updates)
            }
            StreamEvent::ContentBlockDelta { delta } => self.on_delta(delta, &mut updates)?,
            StreamEvent::ContentBlockStop => {
                if let Some(current) = self.current.as_mut() {
                    current.close_open_block(&mut updates);
                } else {
                    tracing::debug!("content_block_stop without an open message");
                }
            }
            StreamEvent::MessageStop { stop_reason } => {
                self.on_message_stop(stop_reason, &mut updates)?
            }
            StreamEvent::Metadata { usage } => self.on_metadata(usage, &mut updates),
        }
        Ok(updates)
    }

    /// Immutable copy of the message being assembled, open block included.
    pub fn snapshot(&self) -> Option<Message> {
        let current = self.current.as_ref()?;
        let mut content = current.blocks.clone();
        if let Some(block) = current.open.clone().and_then(OpenBlock::finish) {
            content.push(block);
        }
        Some(Message {
            id: current.id.clone(),
            role: current.role,
            content,
            metadata: None,
            timestamp: Some(chrono::Utc::now()),
        })
    }

    /// Take whatever was generated so far, dropping a tool-use block whose
    /// input is still streaming. Returns `None` when nothing usable exists.
    pub fn take_partial(&mut self) -> Option<Message> {
        let mut current = self.current.take()?;
        match current.open.take() {
            Some(OpenBlock::ToolUse { .. }) | None => {}
            Some(open) => {
                if let Some(block) = open.finish() {
                    current.blocks.push(block);
                }
            }
        }
        if current.blocks.is_empty() {
            return None;
        }
        let mut message = Message::new(current.role, current.blocks).with_id(current.id);
        if let Some(usage) = current.usage {
            message.metadata_mut().usage = Some(usage);
        }
        Some(message)
    }

    /// Whether a message is currently being assembled.
    pub fn is_message_open(&self) -> bool {
        self.current.is_some()
    }

    /// The most recently finalized message, with any patched usage.
    pub fn last_finalized(&self) -> Option<&Message> {
        self.last_finalized.as_ref()
    }

    /// Drop all state, e.g. before retrying a request.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn on_message_start(&mut self, role: Role, updates: &mut Vec<AssemblyUpdate>) -> Result<()> {
        match self.current.as_mut() {
            Some(current) if current.started => {
                return Err(ParleyError::protocol(
                    "message_start received while a message is still open",
                ));
            }
            Some(current) => {
                current.started = true;
                current.role = role;
            }
            None => {
                let mut message = PartialMessage::new(role, true);
                message.usage = self.pending_usage.take();
                self.current = Some(message);
            }
        }
        if let Some(current) = self.current.as_ref() {
            updates.push(AssemblyUpdate::MessageStarted {
                message_id: current.id.clone(),
                role,
            });
        }
        Ok(())
    }

    fn open_message(&mut self) -> &mut PartialMessage {
        let pending_usage = &mut self.pending_usage;
        self.current.get_or_insert_with(|| {
            let mut message = PartialMessage::new(Role::Assistant, false);
            message.usage = pending_usage.take();
            message
        })
    }

    fn on_block_start(&mut self, tool_use: Option<ToolUseStart>, updates: &mut Vec<AssemblyUpdate>) {
        let current = self.open_message();
        current.close_open_block(updates);
        if let Some(start) = tool_use {
            updates.push(AssemblyUpdate::ToolUseStarted {
                message_id: current.id.clone(),
                tool_use_id: start.tool_use_id.clone(),
                name: start.name.clone(),
            });
            current.open = Some(OpenBlock::ToolUse {
                tool_use_id: start.tool_use_id,
                name: start.name,
                input: String::new(),
            });
        }
    }

    fn on_delta(&mut self, delta: BlockDelta, updates: &mut Vec<AssemblyUpdate>) -> Result<()> {
        let current = self.open_message();
        let message_id = current.id.clone();
        match delta {
            BlockDelta::Text(text) => {
                if text.is_empty() {
                    return Ok(());
                }
                match current.open.as_mut() {
                    Some(OpenBlock::Text(buffer)) => buffer.push_str(&text),
                    _ => {
                        current.close_open_block(updates);
                        current.open = Some(OpenBlock::Text(text.clone()));
                    }
                }
                updates.push(AssemblyUpdate::TextDelta { message_id, text });
            }
            BlockDelta::ToolUseInput(fragment) => match current.open.as_mut() {
                Some(OpenBlock::ToolUse {
                    tool_use_id, input, ..
                }) => {
                    input.push_str(&fragment);
                    updates.push(AssemblyUpdate::ToolInputDelta {
                        message_id,
                        tool_use_id: tool_use_id.clone(),
                        fragment,
                    });
                }
                _ => {
                    return Err(ParleyError::protocol(
                        "tool input fragment without an open tool_use block",
                    ));
                }
            },
            BlockDelta::Reasoning(ReasoningDelta::Text(text)) => {
                match current.open.as_mut() {
                    Some(OpenBlock::Reasoning { text: buffer, .. }) => buffer.push_str(&text),
                    _ => {
                        current.close_open_block(updates);
                        current.open = Some(OpenBlock::Reasoning {
                            text: text.clone(),
                            signature: None,
                        });
                    }
                }
                if !text.is_empty() {
                    updates.push(AssemblyUpdate::ReasoningDelta { message_id, text });
                }
            }
            BlockDelta::Reasoning(ReasoningDelta::Signature(signature)) => {
                match current.open.as_mut() {
                    Some(OpenBlock::Reasoning {
                        signature: existing,
                        ..
                    }) => existing.get_or_insert_with(String::new).push_str(&signature),
                    _ => {
                        current.close_open_block(updates);
                        current.open = Some(OpenBlock::Reasoning {
                            text: String::new(),
                            signature: Some(signature),
                        });
                    }
                }
            }
            BlockDelta::Reasoning(ReasoningDelta::Redacted(data)) => match current.open.as_mut() {
                Some(OpenBlock::Redacted(buffer)) => buffer.push_str(&data),
                _ => {
                    current.close_open_block(updates);
                    current.open = Some(OpenBlock::Redacted(data));
                }
            },
        }
        Ok(())
    }

    fn on_message_stop(
        &mut self,
        stop_reason: StopReason,
        updates: &mut Vec<AssemblyUpdate>,
    ) -> Result<()> {
        let Some(mut current) = self.current.take() else {
            return Err(ParleyError::protocol(
                "message_stop received without message_start",
            ));
        };
        if !current.started {
            return Err(ParleyError::protocol(
                "message_stop received without message_start",
            ));
        }
        current.close_open_block(updates);
        let message = Message {
            id: current.id,
            role: current.role,
            content: current.blocks,
            metadata: Some(MessageMetadata {
                usage: current.usage,
                stop_reason: Some(stop_reason),
                ..Default::default()
            }),
            timestamp: Some(chrono::Utc::now()),
        };
        self.last_finalized = Some(message.clone());
        updates.push(AssemblyUpdate::MessageFinalized {
            message,
            stop_reason,
        });
        Ok(())
    }

    fn on_metadata(&mut self, usage: Usage, updates: &mut Vec<AssemblyUpdate>) {
        if let Some(current) = self.current.as_mut() {
            current.usage = Some(usage);
            return;
        }
        match self.last_finalized.as_mut() {
            Some(message) => {
                message.metadata_mut().usage = Some(usage.clone());
                updates.push(AssemblyUpdate::UsagePatch {
                    message_id: message.id.clone(),
                    usage,
                });
            }
            None => self.pending_usage = Some(usage),
        }
    }
}

fn parse_tool_input(tool_use_id: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(
                tool_use_id,
                error = %err,
                "tool input is not valid JSON; keeping raw string"
            );
            serde_json::Value::String(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn feed(assembler: &mut StreamEventAssembler, events: Vec<StreamEvent>) -> Vec<AssemblyUpdate> {
        events
            .into_iter()
            .flat_map(|event| assembler.push(event).expect("event accepted"))
            .collect()
    }

    fn finalized(updates: &[AssemblyUpdate]) -> Message {
        updates
            .iter()
            .find_map(|update| match update {
                AssemblyUpdate::MessageFinalized { message, .. } => Some(message.clone()),
                _ => None,
            })
            .expect("message finalized")
    }

    #[test]
    fn text_turn_assembles_single_text_block() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::text("4"),
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
            ],
        );
        let message = finalized(&updates);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, vec![ContentBlock::text("4")]);
        assert!(updates.iter().any(|u| matches!(
            u,
            AssemblyUpdate::TextDelta { text, .. } if text == "4"
        )));
    }

    #[test]
    fn text_deltas_accumulate_into_one_block() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::text("Hel"),
                StreamEvent::text("lo"),
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
            ],
        );
        assert_eq!(finalized(&updates).content, vec![ContentBlock::text("Hello")]);
    }

    #[test]
    fn block_order_follows_generation_order() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::reasoning("thinking"),
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::Reasoning(ReasoningDelta::Signature("sig".into())),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::text("Let me look."),
                StreamEvent::ContentBlockStop,
                StreamEvent::tool_use_start("t1", "readFiles"),
                StreamEvent::tool_input("{\"paths\":"),
                StreamEvent::tool_input("[\"a.txt\"]}"),
                StreamEvent::ContentBlockStop,
                StreamEvent::tool_use_start("t2", "listDir"),
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::ToolUse,
                },
            ],
        );
        let message = finalized(&updates);
        assert_eq!(
            message.content,
            vec![
                ContentBlock::Reasoning {
                    text: "thinking".into(),
                    signature: Some("sig".into()),
                },
                ContentBlock::text("Let me look."),
                ContentBlock::ToolUse(ToolUse {
                    tool_use_id: "t1".into(),
                    name: "readFiles".into(),
                    input: json!({"paths": ["a.txt"]}),
                }),
                ContentBlock::ToolUse(ToolUse {
                    tool_use_id: "t2".into(),
                    name: "listDir".into(),
                    input: json!({}),
                }),
            ]
        );
    }

    #[test]
    fn invalid_tool_input_keeps_raw_string() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::tool_use_start("t1", "search"),
                StreamEvent::tool_input("{\"query\": \"unterminated"),
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::ToolUse,
                },
            ],
        );
        let message = finalized(&updates);
        let uses = message.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].input, json!("{\"query\": \"unterminated"));
    }

    #[test]
    fn message_stop_without_start_is_protocol_error() {
        let mut assembler = StreamEventAssembler::new();
        assembler.push(StreamEvent::text("orphan")).expect("delta accepted");
        let err = assembler
            .push(StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            })
            .expect_err("stop without start must fail");
        assert!(matches!(err, ParleyError::Protocol(_)));
        assert!(err.is_retryable());

        let mut empty = StreamEventAssembler::new();
        let err = empty
            .push(StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            })
            .expect_err("bare stop must fail");
        assert!(err.is_retryable());
    }

    #[test]
    fn tool_input_without_tool_block_is_protocol_error() {
        let mut assembler = StreamEventAssembler::new();
        assembler
            .push(StreamEvent::MessageStart {
                role: Role::Assistant,
            })
            .expect("start accepted");
        let err = assembler
            .push(StreamEvent::tool_input("{}"))
            .expect_err("fragment without block must fail");
        assert!(matches!(err, ParleyError::Protocol(_)));
    }

    #[test]
    fn metadata_after_stop_patches_finalized_message() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::text("4"),
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
                StreamEvent::Metadata {
                    usage: Usage::new(5, 1),
                },
            ],
        );
        let message = finalized(&updates);
        assert!(message.usage().is_none());
        let patch = updates
            .iter()
            .find_map(|update| match update {
                AssemblyUpdate::UsagePatch { message_id, usage } => {
                    Some((message_id.clone(), usage.clone()))
                }
                _ => None,
            })
            .expect("usage patch");
        assert_eq!(patch.0, message.id);
        assert_eq!(patch.1, Usage::new(5, 1));
        assert_eq!(
            assembler.last_finalized().and_then(Message::usage),
            Some(&Usage::new(5, 1))
        );
    }

    #[test]
    fn metadata_before_stop_is_attached_at_finalization() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::text("ok"),
                StreamEvent::Metadata {
                    usage: Usage::new(3, 2),
                },
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
            ],
        );
        assert_eq!(finalized(&updates).usage(), Some(&Usage::new(3, 2)));
        assert!(!updates
            .iter()
            .any(|u| matches!(u, AssemblyUpdate::UsagePatch { .. })));
    }

    #[test]
    fn redacted_and_reasoning_never_share_a_block() {
        let mut assembler = StreamEventAssembler::new();
        let updates = feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::reasoning("visible"),
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::Reasoning(ReasoningDelta::Redacted("opaque".into())),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
            ],
        );
        assert_eq!(
            finalized(&updates).content,
            vec![
                ContentBlock::Reasoning {
                    text: "visible".into(),
                    signature: None,
                },
                ContentBlock::Redacted {
                    data: "opaque".into(),
                },
            ]
        );
    }

    #[test]
    fn second_message_start_while_open_is_rejected() {
        let mut assembler = StreamEventAssembler::new();
        assembler
            .push(StreamEvent::MessageStart {
                role: Role::Assistant,
            })
            .expect("first start");
        assert!(assembler
            .push(StreamEvent::MessageStart {
                role: Role::Assistant,
            })
            .is_err());
    }

    #[test]
    fn take_partial_drops_streaming_tool_use() {
        let mut assembler = StreamEventAssembler::new();
        feed(
            &mut assembler,
            vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::text("Reading"),
                StreamEvent::ContentBlockStop,
                StreamEvent::tool_use_start("t1", "readFiles"),
                StreamEvent::tool_input("{\"pa"),
            ],
        );
        let snapshot = assembler.snapshot().expect("snapshot");
        assert_eq!(snapshot.content.len(), 2);

        let partial = assembler.take_partial().expect("partial message");
        assert_eq!(partial.content, vec![ContentBlock::text("Reading")]);
        assert!(!assembler.is_message_open());
    }
}
