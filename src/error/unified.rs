//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category used to route recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Cancellation,
    ToolExecution,
    Guardrail,
    Safety,
    Persistence,
    Context,
    Timeout,
    Configuration,
    Serialization,
    State,
}

/// Suggested recovery action for a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySuggestion {
    /// Send the same request again.
    Retry,
    /// Resubmit once the transport is reachable again.
    ResubmitLater,
    /// Nothing to do; the condition is expected.
    None,
    /// Shorten history or raise the token budget.
    ReduceInputSize,
    /// Raise the recursion limit or inspect the tool loop.
    InspectToolLoop,
    /// Fix configuration values.
    CheckConfiguration,
    /// Inspect the collaborator that failed.
    CheckCollaborator,
}
