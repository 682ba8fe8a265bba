use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::provider::{EventStream, ModelRequest};
use crate::tools::FnTool;
use crate::types::{Role, StopReason, StreamEvent, Usage};

pub(super) const TEST_MODEL: &str = "anthropic/claude-sonnet-4";

/// One scripted action of a model stream.
#[derive(Debug, Clone)]
pub(super) enum Step {
    Event(StreamEvent),
    /// Fail opening the stream (only meaningful as the first step).
    RefuseOpen(String),
    /// Yield a transport error and end the stream.
    Transport(String),
    Pause(Duration),
    /// Produce nothing until the request is canceled.
    Hang,
}

/// Model client that replays one script per call; the last script repeats.
pub(super) struct ScriptedClient {
    scripts: Vec<Vec<Step>>,
    calls: AtomicUsize,
    requests: StdMutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    pub(super) fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            calls: AtomicUsize::new(0),
            requests: StdMutex::new(Vec::new()),
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("request lock").clone()
    }

    pub(super) fn last_request(&self) -> ModelRequest {
        self.requests().pop().expect("at least one request")
    }
}

#[async_trait]
impl ModelStreamClient for ScriptedClient {
    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        self.requests
            .lock()
            .expect("request lock")
            .push(request.clone());
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .scripts
            .get(index)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default();
        if let Some(Step::RefuseOpen(message)) = steps.first() {
            return Err(ParleyError::transport(message.clone()));
        }

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Transport(message) => {
                        yield Err(ParleyError::transport(message));
                        return;
                    }
                    Step::Pause(duration) => {
                        if timeout(duration, cancel.cancelled()).await.is_ok() {
                            return;
                        }
                    }
                    Step::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                    Step::RefuseOpen(_) => {}
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

pub(super) fn text_turn(text: &str, usage: Option<Usage>) -> Vec<Step> {
    let mut steps = vec![
        Step::Event(StreamEvent::MessageStart {
            role: Role::Assistant,
        }),
        Step::Event(StreamEvent::ContentBlockStart { tool_use: None }),
    ];
    // Two fragments so live views see more than one delta.
    let split = text.len() / 2;
    let (head, tail) = text.split_at(split);
    for fragment in [head, tail] {
        if !fragment.is_empty() {
            steps.push(Step::Event(StreamEvent::text(fragment)));
        }
    }
    steps.push(Step::Event(StreamEvent::ContentBlockStop));
    steps.push(Step::Event(StreamEvent::MessageStop {
        stop_reason: StopReason::EndTurn,
    }));
    if let Some(usage) = usage {
        steps.push(Step::Event(StreamEvent::Metadata { usage }));
    }
    steps
}

pub(super) fn tool_use_turn(uses: &[(&str, &str, serde_json::Value)]) -> Vec<Step> {
    let mut steps = vec![Step::Event(StreamEvent::MessageStart {
        role: Role::Assistant,
    })];
    for (id, name, input) in uses {
        steps.push(Step::Event(StreamEvent::tool_use_start(*id, *name)));
        let raw = input.to_string();
        let (head, tail) = raw.split_at(raw.len() / 2);
        steps.push(Step::Event(StreamEvent::tool_input(head)));
        steps.push(Step::Event(StreamEvent::tool_input(tail)));
        steps.push(Step::Event(StreamEvent::ContentBlockStop));
    }
    steps.push(Step::Event(StreamEvent::MessageStop {
        stop_reason: StopReason::ToolUse,
    }));
    steps.push(Step::Event(StreamEvent::Metadata {
        usage: Usage::new(10, 5),
    }));
    steps
}

pub(super) fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::builder().model_id(TEST_MODEL).build()
}

pub(super) struct Harness {
    pub(super) orchestrator: Arc<ConversationOrchestrator>,
    pub(super) client: Arc<ScriptedClient>,
    pub(super) persistence: Arc<InMemoryPersistence>,
}

impl Harness {
    pub(super) async fn stored(&self) -> Vec<Message> {
        self.persistence
            .load(self.orchestrator.session_id())
            .await
    }
}

pub(super) fn harness(scripts: Vec<Vec<Step>>) -> Harness {
    harness_with(test_config(), scripts, ToolRegistry::new(), None)
}

pub(super) fn harness_with(
    config: OrchestratorConfig,
    scripts: Vec<Vec<Step>>,
    tools: ToolRegistry,
    guardrail: Option<Arc<dyn GuardrailChecker>>,
) -> Harness {
    let client = ScriptedClient::new(scripts);
    let persistence = Arc::new(InMemoryPersistence::new());
    let collaborators = Collaborators::builder()
        .client(client.clone())
        .tools(Arc::new(tools))
        .maybe_guardrail(guardrail)
        .persistence(persistence.clone())
        .build();
    let orchestrator =
        ConversationOrchestrator::new(config, collaborators).expect("valid test config");
    Harness {
        orchestrator: Arc::new(orchestrator),
        client,
        persistence,
    }
}

pub(super) fn read_files_tool() -> FnTool {
    FnTool::new(
        "readFiles",
        "Read files from disk",
        serde_json::json!({
            "type": "object",
            "properties": { "paths": { "type": "array", "items": { "type": "string" } } },
            "required": ["paths"]
        }),
        |input| async move {
            let paths = input
                .get("paths")
                .and_then(|paths| paths.as_array())
                .cloned()
                .unwrap_or_default();
            let rendered: Vec<String> = paths
                .iter()
                .filter_map(|path| path.as_str())
                .map(|path| format!("{path}: hi"))
                .collect();
            Ok(serde_json::Value::String(rendered.join("\n")))
        },
    )
}

/// Tool that signals `started` and then waits for `release`.
pub(super) fn gated_tool(name: &str, started: Arc<Notify>, release: Arc<Notify>) -> FnTool {
    FnTool::new(
        name,
        "Waits until released",
        serde_json::json!({"type": "object"}),
        move |_| {
            let started = started.clone();
            let release = release.clone();
            async move {
                started.notify_one();
                release.notified().await;
                Ok(serde_json::json!("late result"))
            }
        },
    )
}

pub(super) fn drain(rx: &mut broadcast::Receiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait (bounded) for the first event matching `predicate`.
pub(super) async fn wait_for<F>(
    rx: &mut broadcast::Receiver<ConversationEvent>,
    predicate: F,
) -> ConversationEvent
where
    F: Fn(&ConversationEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("event channel closed: {err}"),
            }
        }
    })
    .await
    .expect("event should arrive")
}

pub(super) fn state_changes(events: &[ConversationEvent]) -> Vec<OrchestratorState> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversationEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

/// Every tool use in `messages` has a result somewhere after it.
pub(super) fn assert_no_orphans(messages: &[Message]) {
    for (index, message) in messages.iter().enumerate() {
        for tool_use in message.tool_uses() {
            let answered = messages[index + 1..].iter().any(|later| {
                later
                    .tool_result_blocks()
                    .iter()
                    .any(|result| result.tool_use_id == tool_use.tool_use_id)
            });
            assert!(answered, "tool use {} has no result", tool_use.tool_use_id);
        }
    }
}
