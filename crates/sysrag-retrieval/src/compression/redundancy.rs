use std::sync::Arc;

use sysrag_core::traits::Embedder;
use sysrag_core::types::Candidate;
use sysrag_core::Result;

use super::{cosine, embed, CompressionStage};

/// Removes near-duplicates: a candidate is dropped when its embedding is at
/// least `threshold` similar to a candidate kept before it. Overlapping
/// chunks of the same document are the usual victims.
pub struct RedundancyFilter {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl RedundancyFilter {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self { embedder, threshold }
    }
}

impl CompressionStage for RedundancyFilter {
    fn name(&self) -> &'static str {
        "redundancy"
    }

    fn transform(&self, candidates: Vec<Candidate>, _query: &str) -> Result<Vec<Candidate>> {
        if candidates.len() < 2 {
            return Ok(candidates);
        }
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let vectors = embed(self.embedder.as_ref(), &texts)?;

        let mut kept_vectors: Vec<&[f32]> = Vec::new();
        let mut kept = Vec::new();
        for (candidate, vector) in candidates.into_iter().zip(&vectors) {
            if kept_vectors.iter().any(|prev| cosine(prev, vector) >= self.threshold) {
                tracing::trace!(chunk = %candidate.chunk_id, "dropping near-duplicate");
                continue;
            }
            kept_vectors.push(vector);
            kept.push(candidate);
        }
        Ok(kept)
    }
}
