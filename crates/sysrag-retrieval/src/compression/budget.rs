use sysrag_core::tokens::{count_tokens, truncate_to_tokens};
use sysrag_core::types::Candidate;
use sysrag_core::Result;

use super::CompressionStage;

/// Keeps the leading candidates that fit in `max_tokens`. The first one
/// that overflows is cut to the remaining budget and ends the sequence.
pub struct TokenBudget {
    max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl CompressionStage for TokenBudget {
    fn name(&self) -> &'static str {
        "token_budget"
    }

    fn transform(&self, candidates: Vec<Candidate>, _query: &str) -> Result<Vec<Candidate>> {
        let mut used = 0;
        let mut kept = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            let tokens = count_tokens(&candidate.text);
            if used + tokens <= self.max_tokens {
                used += tokens;
                kept.push(candidate);
                continue;
            }
            let remaining = self.max_tokens - used;
            if remaining > 0 {
                candidate.text = truncate_to_tokens(&candidate.text, remaining).to_string();
                kept.push(candidate);
            }
            break;
        }
        Ok(kept)
    }
}
