//! Token accounting and cost computation.
//!
//! Unit prices are USD per one million tokens; cost for a turn is
//! `(prompt × prompt_price + completion × completion_price) / 1e6`.

use crate::catalog::ModelCatalog;
use shared::chat::{Message, TokenUsage};

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Rough local guess: ~4 characters per token.
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

/// Running usage guess maintained while a stream is in flight. Marked
/// non-authoritative; any server snapshot supersedes it wholesale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingEstimate {
    /// Character count of the full outgoing request content.
    pub prompt_chars: usize,
    /// Number of non-empty fragments emitted so far.
    pub fragments: u64,
}

impl StreamingEstimate {
    pub fn new(prompt_chars: usize) -> Self {
        Self {
            prompt_chars,
            fragments: 0,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(estimate_tokens(self.prompt_chars), self.fragments)
    }
}

/// Cost of `usage` against the given unit prices.
pub fn cost(usage: &TokenUsage, prompt_price: f64, completion_price: f64) -> f64 {
    (usage.prompt_tokens as f64 * prompt_price
        + usage.completion_tokens as f64 * completion_price)
        / TOKENS_PER_PRICE_UNIT
}

/// Cost of `usage` for a model looked up in the catalog. A model the
/// catalog does not know prices at zero; that is not an error.
pub fn cost_for_model(catalog: &ModelCatalog, model_id: &str, usage: &TokenUsage) -> f64 {
    match catalog.get(model_id) {
        Some(m) => cost(usage, m.prompt_price, m.completion_price),
        None => 0.0,
    }
}

/// Aggregate accounting for a whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub total_messages: usize,
}

/// Recompute session totals from the message list.
pub fn recalculate_stats(messages: &[Message], catalog: &ModelCatalog) -> ChatStats {
    let mut stats = ChatStats {
        total_messages: messages.len(),
        ..Default::default()
    };
    for message in messages {
        let Some(usage) = &message.usage else {
            continue;
        };
        stats.prompt_tokens += usage.prompt_tokens;
        stats.completion_tokens += usage.completion_tokens;
        if let Some(model) = &message.model {
            stats.cost += cost_for_model(catalog, model, usage);
        }
    }
    stats
}
