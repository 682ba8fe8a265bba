//! Tests for configuration loading.

use std::sync::{Mutex, OnceLock};

use parley::config::{GuardrailConfig, OrchestratorConfig, DEFAULT_MAX_RECURSION_DEPTH};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 8] = [
    "PARLEY_MODEL_ID",
    "PARLEY_SYSTEM_PROMPT",
    "PARLEY_TOKEN_BUDGET",
    "PARLEY_PROMPT_CACHING",
    "PARLEY_MAX_RECURSION_DEPTH",
    "PARLEY_MAX_TOOL_CONCURRENCY",
    "PARLEY_STREAM_IDLE_TIMEOUT_MS",
    "PARLEY_GUARDRAILS",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn with_clean_env<F: FnOnce()>(f: F) {
    let _lock = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    f();
}

#[test]
fn env_overrides_win_over_code() {
    with_clean_env(|| {
        std::env::set_var("PARLEY_MODEL_ID", "openai/gpt-4o");
        std::env::set_var("PARLEY_TOKEN_BUDGET", "4096");
        std::env::set_var("PARLEY_PROMPT_CACHING", "yes");
        std::env::set_var("PARLEY_MAX_TOOL_CONCURRENCY", "2");
        std::env::set_var("PARLEY_STREAM_IDLE_TIMEOUT_MS", "0");
        std::env::set_var("PARLEY_GUARDRAILS", "on");

        let config = OrchestratorConfig::builder()
            .model_id("anthropic/claude-sonnet-4")
            .build()
            .with_env_overrides();

        assert_eq!(config.model_id, "openai/gpt-4o");
        assert_eq!(config.token_budget, 4096);
        assert!(config.caching_enabled);
        assert_eq!(config.max_tool_concurrency, Some(2));
        assert_eq!(config.idle_timeout_ms(), None);
        assert_eq!(config.guardrails, GuardrailConfig::enabled());
    });
}

#[test]
fn malformed_env_values_are_ignored() {
    with_clean_env(|| {
        std::env::set_var("PARLEY_MAX_RECURSION_DEPTH", "0");
        std::env::set_var("PARLEY_TOKEN_BUDGET", "lots");
        std::env::set_var("PARLEY_PROMPT_CACHING", "perhaps");

        let config = OrchestratorConfig::builder()
            .model_id("m")
            .token_budget(1000)
            .build()
            .with_env_overrides();

        assert_eq!(config.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
        assert_eq!(config.token_budget, 1000);
        assert!(!config.caching_enabled);
    });
}

#[test]
fn config_deserializes_with_defaults() {
    let config: OrchestratorConfig = toml::from_str(
        r#"
        model_id = "anthropic/claude-sonnet-4"
        caching_enabled = true

        [guardrails]
        check_input = true
        "#,
    )
    .unwrap();

    assert_eq!(config.model_id, "anthropic/claude-sonnet-4");
    assert!(config.caching_enabled);
    assert!(config.guardrails.check_input);
    assert!(!config.guardrails.check_tool_output);
    assert_eq!(config.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
    assert!(config.validate().is_ok());
}
