//! Concurrent execution of one turn's tool-use blocks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{future, stream, FutureExt, StreamExt};

use super::executor::ToolExecutor;
use super::guardrail::{GuardrailChecker, GuardrailDirection};
use crate::types::{ToolResult, ToolUse};

/// Result text used when a guardrail intervenes without remediation.
pub const DEFAULT_GUARDRAIL_REMEDIATION: &str = "Tool output was withheld by a content guardrail.";

/// Runs tool-use blocks and turns every outcome into a [`ToolResult`].
///
/// Results always match the input in length and order. A failing or
/// panicking tool only affects its own result.
#[derive(Clone)]
pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    guardrail: Option<Arc<dyn GuardrailChecker>>,
    max_concurrency: Option<usize>,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            guardrail: None,
            max_concurrency: None,
        }
    }

    /// Check successful tool output with `checker` before returning it.
    pub fn with_output_guardrail(mut self, checker: Arc<dyn GuardrailChecker>) -> Self {
        self.guardrail = Some(checker);
        self
    }

    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.filter(|limit| *limit > 0);
        self
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.executor
    }

    pub async fn dispatch(&self, tool_uses: &[ToolUse]) -> Vec<ToolResult> {
        self.dispatch_observed(tool_uses, |_, _| {}).await
    }

    /// Like [`dispatch`](Self::dispatch), calling `on_finished` as each tool
    /// completes (in completion order).
    pub async fn dispatch_observed<F>(&self, tool_uses: &[ToolUse], on_finished: F) -> Vec<ToolResult>
    where
        F: Fn(&ToolUse, &ToolResult) + Sync,
    {
        let runs: Vec<_> = tool_uses
            .iter()
            .map(|tool_use| self.run_observed(tool_use, &on_finished))
            .collect();
        match self.max_concurrency {
            Some(limit) => stream::iter(runs).buffered(limit).collect::<Vec<_>>().await,
            None => future::join_all(runs).await,
        }
    }

    async fn run_observed<F>(&self, tool_use: &ToolUse, on_finished: &F) -> ToolResult
    where
        F: Fn(&ToolUse, &ToolResult) + Sync,
    {
        let result = self.run_one(tool_use).await;
        on_finished(tool_use, &result);
        result
    }

    async fn run_one(&self, tool_use: &ToolUse) -> ToolResult {
        let execution = AssertUnwindSafe(self.executor.execute(&tool_use.name, &tool_use.input))
            .catch_unwind()
            .await;
        let result = match execution {
            Ok(Ok(outcome)) => ToolResult {
                tool_use_id: tool_use.tool_use_id.clone(),
                content: outcome.content,
                status: outcome.status,
            },
            Ok(Err(err)) => {
                tracing::debug!(
                    tool_use_id = %tool_use.tool_use_id,
                    tool = %tool_use.name,
                    error = %err,
                    "tool execution failed"
                );
                ToolResult::error(tool_use.tool_use_id.clone(), err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    tool_use_id = %tool_use.tool_use_id,
                    tool = %tool_use.name,
                    panic = %message,
                    "tool panicked"
                );
                ToolResult::error(
                    tool_use.tool_use_id.clone(),
                    format!("Tool '{}' panicked: {message}", tool_use.name),
                )
            }
        };
        self.check_output(tool_use, result).await
    }

    async fn check_output(&self, tool_use: &ToolUse, result: ToolResult) -> ToolResult {
        let Some(guardrail) = self.guardrail.as_ref() else {
            return result;
        };
        if result.is_error() {
            return result;
        }
        let text = result.content.as_text();
        match guardrail.check(GuardrailDirection::Output, &text).await {
            Ok(assessment) if assessment.intervened => {
                tracing::info!(
                    tool_use_id = %tool_use.tool_use_id,
                    tool = %tool_use.name,
                    "guardrail intervened on tool output"
                );
                ToolResult::error(
                    result.tool_use_id,
                    assessment
                        .remediation
                        .unwrap_or_else(|| DEFAULT_GUARDRAIL_REMEDIATION.to_string()),
                )
            }
            Ok(_) => result,
            Err(err) => {
                tracing::warn!(
                    tool_use_id = %tool_use.tool_use_id,
                    error = %err,
                    "guardrail check failed; keeping tool output"
                );
                result
            }
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("output_guardrail", &self.guardrail.is_some())
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
