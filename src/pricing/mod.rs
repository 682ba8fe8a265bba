//! Per-model token pricing.
//!
//! Prices are in USD per 1 million tokens. The built-in table covers common
//! hosted models; hosts can override or extend it from TOML:
//!
//! ```toml
//! [models."anthropic/claude-sonnet-4"]
//! input_per_m = 3.0
//! output_per_m = 15.0
//! cache_read_per_m = 0.3
//! cache_write_per_m = 3.75
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Turns token counts into a cost for a model id.
pub trait CostTable: Send + Sync {
    /// Cost in USD, or `None` when the model has no price entry.
    fn price(
        &self,
        model_id: &str,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: Option<u32>,
        cache_write_tokens: Option<u32>,
    ) -> Option<f64>;
}

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
    /// Falls back to the input price when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_per_m: Option<f64>,
    /// Falls back to the input price when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_per_m: Option<f64>,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_read_per_m: None,
            cache_write_per_m: None,
        }
    }

    pub fn with_cache(mut self, read_per_m: f64, write_per_m: f64) -> Self {
        self.cache_read_per_m = Some(read_per_m);
        self.cache_write_per_m = Some(write_per_m);
        self
    }

    pub fn cost(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: Option<u32>,
        cache_write_tokens: Option<u32>,
    ) -> f64 {
        let cache_read = cache_read_tokens.unwrap_or(0) as f64
            * self.cache_read_per_m.unwrap_or(self.input_per_m);
        let cache_write = cache_write_tokens.unwrap_or(0) as f64
            * self.cache_write_per_m.unwrap_or(self.input_per_m);
        (input_tokens as f64 * self.input_per_m
            + output_tokens as f64 * self.output_per_m
            + cache_read
            + cache_write)
            / 1_000_000.0
    }
}

#[derive(Debug, Deserialize)]
struct PricingOverrides {
    #[serde(default)]
    models: HashMap<String, ModelPricing>,
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // Anthropic: cache reads at 0.1x input, cache writes at 1.25x.
        for (model, input, output) in [
            ("anthropic/claude-opus-4", 15.0, 75.0),
            ("anthropic/claude-sonnet-4", 3.0, 15.0),
            ("anthropic/claude-3.7-sonnet", 3.0, 15.0),
            ("anthropic/claude-3.5-sonnet", 3.0, 15.0),
            ("anthropic/claude-3.5-haiku", 0.8, 4.0),
            ("anthropic/claude-3-haiku", 0.25, 1.25),
        ] {
            prices.insert(
                model.to_string(),
                ModelPricing::new(input, output).with_cache(input * 0.1, input * 1.25),
            );
        }

        prices.insert(
            "openai/gpt-4o".into(),
            ModelPricing::new(2.5, 10.0).with_cache(1.25, 2.5),
        );
        prices.insert(
            "openai/gpt-4o-mini".into(),
            ModelPricing::new(0.15, 0.6).with_cache(0.075, 0.15),
        );
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4));

        prices.insert("google/gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("google/gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));

        prices.insert("amazon/nova-pro".into(), ModelPricing::new(0.8, 3.2));
        prices.insert("amazon/nova-lite".into(), ModelPricing::new(0.06, 0.24));

        prices.insert("mistral/mistral-large".into(), ModelPricing::new(2.0, 6.0));
        prices.insert("deepseek/deepseek-r1".into(), ModelPricing::new(0.55, 2.19));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Built-in prices with the overrides from a TOML document applied.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let table = Self::with_defaults();
        table.merge_toml_str(toml_str)?;
        Ok(table)
    }

    /// Apply the `[models.*]` entries of a TOML document. Returns how many
    /// entries were applied.
    pub fn merge_toml_str(&self, toml_str: &str) -> Result<usize> {
        let overrides: PricingOverrides = toml::from_str(toml_str)?;
        let count = overrides.models.len();
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.extend(overrides.models);
        Ok(count)
    }

    /// Exact lookup.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// Find pricing for a model id as reported by a provider.
    ///
    /// Tries an exact match, then the longest key whose bare name (after the
    /// provider prefix) is a prefix of the bare model name, so
    /// `us.anthropic.claude-sonnet-4-20250514` style ids and dated suffixes
    /// still resolve.
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        if let Some(pricing) = prices.get(model) {
            return Some(*pricing);
        }

        let model_lower = model.to_lowercase();
        let bare_model = bare_name(&model_lower);
        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = bare_name(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, pricing)| *pricing)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable")
            .field("models", &self.len())
            .finish()
    }
}

impl CostTable for PricingTable {
    fn price(
        &self,
        model_id: &str,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: Option<u32>,
        cache_write_tokens: Option<u32>,
    ) -> Option<f64> {
        self.resolve(model_id).map(|pricing| {
            pricing.cost(
                input_tokens,
                output_tokens,
                cache_read_tokens,
                cache_write_tokens,
            )
        })
    }
}

/// Strip provider prefixes: `openai/gpt-4o` and `us.anthropic.claude-x` both
/// reduce to the model name.
fn bare_name(model: &str) -> &str {
    let after_slash = model.rsplit('/').next().unwrap_or(model);
    match after_slash.find("anthropic.") {
        Some(index) => &after_slash[index + "anthropic.".len()..],
        None => after_slash,
    }
}
