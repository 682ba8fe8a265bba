//! Configuration system (layered: code > env).

use bon::Builder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 25;
pub const DEFAULT_TOKEN_BUDGET: usize = 150_000;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;

const MODEL_ID_ENV: &str = "PARLEY_MODEL_ID";
const SYSTEM_PROMPT_ENV: &str = "PARLEY_SYSTEM_PROMPT";
const TOKEN_BUDGET_ENV: &str = "PARLEY_TOKEN_BUDGET";
const PROMPT_CACHING_ENV: &str = "PARLEY_PROMPT_CACHING";
const MAX_RECURSION_DEPTH_ENV: &str = "PARLEY_MAX_RECURSION_DEPTH";
const MAX_TOOL_CONCURRENCY_ENV: &str = "PARLEY_MAX_TOOL_CONCURRENCY";
const STREAM_IDLE_TIMEOUT_ENV: &str = "PARLEY_STREAM_IDLE_TIMEOUT_MS";
const GUARDRAILS_ENV: &str = "PARLEY_GUARDRAILS";

/// Sampling settings forwarded to the model with every request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct InferenceConfig {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
}

/// Which content passes through the guardrail checker.
#[derive(Debug, Clone, Copy, Builder, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GuardrailConfig {
    /// Check successful tool output before it reaches the model.
    #[builder(default)]
    #[serde(default)]
    pub check_tool_output: bool,
    /// Check user input before the model is invoked.
    #[builder(default)]
    #[serde(default)]
    pub check_input: bool,
}

impl GuardrailConfig {
    pub fn enabled() -> Self {
        Self {
            check_tool_output: true,
            check_input: true,
        }
    }
}

/// Settings for one conversation orchestrator.
///
/// Example:
/// ```
/// use parley::config::OrchestratorConfig;
///
/// let config = OrchestratorConfig::builder()
///     .model_id("anthropic/claude-sonnet-4")
///     .token_budget(32_000)
///     .caching_enabled(true)
///     .build();
/// assert_eq!(config.max_recursion_depth, 25);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Model id sent to the stream client and used for pricing.
    #[builder(into)]
    pub model_id: String,
    #[builder(into)]
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Estimated-token ceiling for the history sent per request.
    #[builder(default = DEFAULT_TOKEN_BUDGET)]
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Place provider cache markers on history, system prompt and tool config.
    #[builder(default)]
    #[serde(default)]
    pub caching_enabled: bool,
    #[builder(default)]
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    /// Maximum tool-use rounds per submitted input.
    #[builder(default = DEFAULT_MAX_RECURSION_DEPTH)]
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Upper bound on concurrent tool executions in one batch.
    #[serde(default)]
    pub max_tool_concurrency: Option<usize>,
    /// Fail the turn when no stream event arrives for this long. `Some(0)` disables.
    #[serde(default)]
    pub stream_idle_timeout_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().model_id("").build()
    }
}

impl OrchestratorConfig {
    /// Load from environment variables, on top of defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides to an existing config.
    ///
    /// Values set in the environment win over values set in code; malformed or
    /// non-positive numbers are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(model_id) = env_string(MODEL_ID_ENV) {
            self.model_id = model_id;
        }
        if let Some(prompt) = env_string(SYSTEM_PROMPT_ENV) {
            self.system_prompt = Some(prompt);
        }
        if let Some(budget) = env_positive(TOKEN_BUDGET_ENV) {
            self.token_budget = budget;
        }
        if let Some(caching) = env_flag(PROMPT_CACHING_ENV) {
            self.caching_enabled = caching;
        }
        if let Some(depth) = env_positive(MAX_RECURSION_DEPTH_ENV) {
            self.max_recursion_depth = depth;
        }
        if let Some(concurrency) = env_positive(MAX_TOOL_CONCURRENCY_ENV) {
            self.max_tool_concurrency = Some(concurrency);
        }
        if let Ok(value) = std::env::var(STREAM_IDLE_TIMEOUT_ENV) {
            if let Ok(ms) = value.trim().parse::<u64>() {
                self.stream_idle_timeout_ms = Some(ms);
            }
        }
        if let Some(guardrails) = env_flag(GUARDRAILS_ENV) {
            self.guardrails = if guardrails {
                GuardrailConfig::enabled()
            } else {
                GuardrailConfig::default()
            };
        }
        self
    }

    /// Effective idle timeout, `None` when disabled.
    pub fn idle_timeout_ms(&self) -> Option<u64> {
        match self
            .stream_idle_timeout_ms
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_MS)
        {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(crate::error::ParleyError::Configuration(
                "model_id must not be empty".to_string(),
            ));
        }
        if self.token_budget == 0 {
            return Err(crate::error::ParleyError::Configuration(
                "token_budget must be positive".to_string(),
            ));
        }
        if self.max_tool_concurrency == Some(0) {
            return Err(crate::error::ParleyError::Configuration(
                "max_tool_concurrency must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

fn default_max_recursion_depth() -> usize {
    DEFAULT_MAX_RECURSION_DEPTH
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_positive(key: &str) -> Option<usize> {
    parse_positive_usize(&std::env::var(key).ok()?)
}

fn env_flag(key: &str) -> Option<bool> {
    parse_flag(&std::env::var(key).ok()?)
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
