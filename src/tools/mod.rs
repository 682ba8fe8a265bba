//! Tool system: executors, the batch dispatcher and guardrails.

pub mod dispatcher;
pub mod executor;
pub mod guardrail;
pub mod tool;

pub use dispatcher::{ToolDispatcher, DEFAULT_GUARDRAIL_REMEDIATION};
pub use executor::{ToolExecutor, ToolOutcome, ToolRegistry};
pub use guardrail::{GuardrailAssessment, GuardrailChecker, GuardrailDirection, PatternGuardrail};
pub use tool::{FnTool, Tool};
