//! Tool execution seam and the registry-backed executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::tool::Tool;
use crate::error::Result;
use crate::provider::ToolSpec;
use crate::types::{ToolResultContent, ToolResultStatus};

/// What a tool produced, before it is tied to a tool-use id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolResultStatus,
    pub content: ToolResultContent,
}

impl ToolOutcome {
    pub fn success(content: impl Into<ToolResultContent>) -> Self {
        Self {
            status: ToolResultStatus::Success,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<ToolResultContent>) -> Self {
        Self {
            status: ToolResultStatus::Error,
            content: content.into(),
        }
    }
}

/// Runs tools by name on behalf of the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `name` with `input`. `Err` is reported to the model as an error
    /// result; it never aborts the turn.
    async fn execute(&self, name: &str, input: &serde_json::Value) -> Result<ToolOutcome>;

    /// Tool definitions to advertise in requests.
    fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

/// Executor backed by a set of [`Tool`] implementations.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, input: &serde_json::Value) -> Result<ToolOutcome> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolOutcome::error(format!("Tool '{name}' not found")));
        };
        let value = tool.execute(input).await?;
        Ok(ToolOutcome::success(value))
    }

    fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use crate::tools::FnTool;
    use serde_json::json;

    fn echo_tool(name: &str) -> FnTool {
        FnTool::new(
            name,
            "Echo the input back",
            json!({"type": "object"}),
            |input| async move { Ok(input) },
        )
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome() {
        let registry = ToolRegistry::new();
        let outcome = registry
            .execute("missing", &json!({}))
            .await
            .expect("lookup never fails");
        assert_eq!(outcome, ToolOutcome::error("Tool 'missing' not found"));
    }

    #[tokio::test]
    async fn string_results_become_text_content() {
        let registry = ToolRegistry::new().with_tool(FnTool::new(
            "greet",
            "Say hi",
            json!({"type": "object"}),
            |_| async { Ok(json!("hi")) },
        ));
        let outcome = registry.execute("greet", &json!({})).await.expect("runs");
        assert_eq!(outcome.content, ToolResultContent::Text("hi".into()));
        assert_eq!(outcome.status, ToolResultStatus::Success);
    }

    #[tokio::test]
    async fn tool_errors_propagate_to_caller() {
        let registry = ToolRegistry::new().with_tool(FnTool::new(
            "fail",
            "Always fails",
            json!({"type": "object"}),
            |_| async {
                Err(ParleyError::ToolExecution {
                    tool_name: "fail".into(),
                    message: "disk full".into(),
                })
            },
        ));
        let err = registry
            .execute("fail", &json!({}))
            .await
            .expect_err("tool error surfaces");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn specs_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(echo_tool("b")))
            .register(Arc::new(echo_tool("a")))
            .register(Arc::new(echo_tool("b")));
        let names: Vec<_> = registry.specs().into_iter().map(|spec| spec.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.len(), 2);
    }
}
