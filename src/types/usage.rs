//! Token usage and cost tracking types.

use serde::{Deserialize, Serialize};

/// Token usage for one model turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            ..Default::default()
        }
    }

    /// Merge another usage into this one (accumulate, saturating at `u32::MAX`).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        add_optional(&mut self.cache_read_tokens, other.cache_read_tokens);
        add_optional(&mut self.cache_write_tokens, other.cache_write_tokens);
    }
}

fn add_optional(slot: &mut Option<u32>, value: Option<u32>) {
    if let Some(value) = value {
        let current = slot.get_or_insert(0);
        *current = current.saturating_add(value);
    }
}

/// Cumulative usage and cost for one session.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionTotals {
    pub usage: Usage,
    /// Sum of priced turns; unpriced turns add nothing.
    pub cost: f64,
    pub priced_turns: u64,
    pub unpriced_turns: u64,
}

impl SessionTotals {
    /// Record one turn's usage and optional cost.
    pub fn record(&mut self, usage: &Usage, cost: Option<f64>) {
        self.usage.merge(usage);
        match cost {
            Some(cost) => {
                self.cost += cost;
                self.priced_turns += 1;
            }
            None => self.unpriced_turns += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let usage = Usage::new(u32::MAX, 10);
        assert_eq!(usage.total_tokens, u32::MAX);

        let mut totals = SessionTotals::default();
        let mut cached = Usage::new(u32::MAX - 1, 1);
        cached.cache_read_tokens = Some(u32::MAX);
        totals.record(&cached, None);
        totals.record(&cached, Some(0.5));

        assert_eq!(totals.usage.input_tokens, u32::MAX);
        assert_eq!(totals.usage.output_tokens, 2);
        assert_eq!(totals.usage.total_tokens, u32::MAX);
        assert_eq!(totals.usage.cache_read_tokens, Some(u32::MAX));
        assert_eq!(totals.usage.cache_write_tokens, None);
        assert_eq!(totals.priced_turns, 1);
    }
}
