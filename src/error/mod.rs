//! Error types for Parley.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stream aborted")]
    Aborted,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Guardrail check failed: {0}")]
    GuardrailCheck(String),

    #[error("Tool recursion limit exceeded (limit={limit})")]
    RecursionLimitExceeded { limit: usize },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Context window overflow: budget {budget} tokens, newest turn needs {required}")]
    ContextOverflow { budget: usize, required: usize },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ParleyError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Aborted => ErrorCategory::Cancellation,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::GuardrailCheck(_) => ErrorCategory::Guardrail,
            Self::RecursionLimitExceeded { .. } => ErrorCategory::Safety,
            Self::Persistence(_) => ErrorCategory::Persistence,
            Self::ContextOverflow { .. } => ErrorCategory::Context,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Toml(_) => ErrorCategory::Serialization,
            Self::InvalidState(_) => ErrorCategory::State,
        }
    }

    /// Whether the orchestrator may silently resend the same request.
    ///
    /// Only malformed or out-of-order stream events qualify; everything else is
    /// either terminal for the turn or absorbed where it happens.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Protocol)
    }

    /// Whether this error represents an explicit cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Protocol => RecoverySuggestion::Retry,
            ErrorCategory::Transport | ErrorCategory::Timeout => RecoverySuggestion::ResubmitLater,
            ErrorCategory::Cancellation => RecoverySuggestion::None,
            ErrorCategory::Context => RecoverySuggestion::ReduceInputSize,
            ErrorCategory::Safety => RecoverySuggestion::InspectToolLoop,
            ErrorCategory::Configuration | ErrorCategory::Serialization => {
                RecoverySuggestion::CheckConfiguration
            }
            ErrorCategory::ToolExecution
            | ErrorCategory::Guardrail
            | ErrorCategory::Persistence
            | ErrorCategory::State => RecoverySuggestion::CheckCollaborator,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
