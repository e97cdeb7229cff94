use sysrag_core::tokens::{sentences, terms};
use sysrag_core::types::Candidate;
use sysrag_core::Result;

use super::CompressionStage;

/// Extractive compression: per candidate, the sentences sharing a term with
/// the query, in their original order, up to `max_sentences`.
pub struct SentenceExtractor {
    max_sentences: usize,
}

impl SentenceExtractor {
    pub fn new(max_sentences: usize) -> Self {
        Self { max_sentences }
    }
}

impl CompressionStage for SentenceExtractor {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn transform(&self, mut candidates: Vec<Candidate>, query: &str) -> Result<Vec<Candidate>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(candidates);
        }
        for candidate in &mut candidates {
            let picked: Vec<&str> = sentences(&candidate.text)
                .into_iter()
                .filter(|s| !terms(s).is_disjoint(&query_terms))
                .take(self.max_sentences)
                .collect();
            // No sentence mentions the query: leave the chunk whole.
            if !picked.is_empty() {
                candidate.text = picked.join(" ");
            }
        }
        Ok(candidates)
    }
}
