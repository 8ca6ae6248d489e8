use serde::{Deserialize, Serialize};

use crate::message::MessageId;
use crate::model::Pricing;

/// Per-turn usage (§3). Always emitted, exact when the LLM returns it,
/// estimated otherwise — billing is never dropped (invariant 6, §8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
    pub model_id: String,
    pub message_id: Option<MessageId>,
    /// Set when counts came from a tokenizer estimate rather than the
    /// provider's own accounting.
    pub estimated: bool,
    /// Set when even the tokenizer estimate was unavailable and the
    /// word-count heuristic (§4.1 tier 3) was used. Distinct from
    /// `estimated` so billing can tag the charge's confidence more finely
    /// than the two-state flag spec.md's data model names.
    pub fallback: bool,
}

impl UsageReport {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn cost_usd(&self, pricing: &Pricing) -> f64 {
        let billable_prompt = self
            .prompt_tokens
            .saturating_sub(self.cache_read_tokens)
            .saturating_sub(self.cache_creation_tokens) as f64;
        billable_prompt * pricing.input_per_million / 1_000_000.0
            + self.completion_tokens as f64 * pricing.output_per_million / 1_000_000.0
            + self.cache_read_tokens as f64 * pricing.cache_read_per_million / 1_000_000.0
            + self.cache_creation_tokens as f64 * pricing.cache_write_per_million / 1_000_000.0
    }
}
