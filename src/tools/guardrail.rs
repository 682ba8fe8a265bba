//! Content guardrails for user input and tool output.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ParleyError, Result};

/// Which side of the conversation the checked content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GuardrailDirection {
    Input,
    Output,
}

/// Verdict returned by a [`GuardrailChecker`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuardrailAssessment {
    pub intervened: bool,
    /// Replacement text to show instead of the blocked content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl GuardrailAssessment {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn intervene(remediation: Option<String>) -> Self {
        Self {
            intervened: true,
            remediation,
        }
    }
}

#[async_trait]
pub trait GuardrailChecker: Send + Sync {
    async fn check(&self, direction: GuardrailDirection, text: &str)
        -> Result<GuardrailAssessment>;
}

struct Rule {
    name: String,
    regex: Regex,
    directions: Vec<GuardrailDirection>,
}

/// Deny-list guardrail: intervenes when any rule's pattern matches.
#[derive(Default)]
pub struct PatternGuardrail {
    rules: Vec<Rule>,
    remediation: Option<String>,
}

impl PatternGuardrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule applied in both directions.
    pub fn deny(self, name: impl Into<String>, pattern: &str) -> Result<Self> {
        self.deny_for(
            name,
            pattern,
            &[GuardrailDirection::Input, GuardrailDirection::Output],
        )
    }

    /// Add a rule applied only to the given directions.
    pub fn deny_for(
        mut self,
        name: impl Into<String>,
        pattern: &str,
        directions: &[GuardrailDirection],
    ) -> Result<Self> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|err| {
            ParleyError::Configuration(format!("invalid guardrail pattern for rule '{name}': {err}"))
        })?;
        self.rules.push(Rule {
            name,
            regex,
            directions: directions.to_vec(),
        });
        Ok(self)
    }

    /// Fixed remediation text; defaults to naming the matched rule.
    pub fn with_remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation = Some(text.into());
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl std::fmt::Debug for PatternGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<_> = self.rules.iter().map(|rule| rule.name.as_str()).collect();
        f.debug_struct("PatternGuardrail")
            .field("rules", &rules)
            .finish()
    }
}

#[async_trait]
impl GuardrailChecker for PatternGuardrail {
    async fn check(
        &self,
        direction: GuardrailDirection,
        text: &str,
    ) -> Result<GuardrailAssessment> {
        let matched = self
            .rules
            .iter()
            .filter(|rule| rule.directions.contains(&direction))
            .find(|rule| rule.regex.is_match(text));
        Ok(match matched {
            None => GuardrailAssessment::pass(),
            Some(rule) => GuardrailAssessment::intervene(Some(
                self.remediation
                    .clone()
                    .unwrap_or_else(|| format!("Blocked by guardrail rule '{}'", rule.name)),
            )),
        })
    }
}
