//! Convenience re-exports for common use.

pub use crate::config::{GuardrailConfig, InferenceConfig, OrchestratorConfig};
pub use crate::error::{ParleyError, Result};
pub use crate::orchestrator::{
    Collaborators, ConversationEvent, ConversationOrchestrator, OrchestratorState, TurnOutcome,
    TurnStatus,
};
pub use crate::persistence::{InMemoryPersistence, MessagePersistence};
pub use crate::pricing::{CostTable, PricingTable};
pub use crate::provider::{ModelRequest, ModelStreamClient};
pub use crate::tools::{FnTool, GuardrailChecker, PatternGuardrail, Tool, ToolExecutor, ToolRegistry};
pub use crate::types::{
    ContentBlock, Message, Role, SessionTotals, StopReason, StreamEvent, ToolResult, ToolUse, Usage,
};
