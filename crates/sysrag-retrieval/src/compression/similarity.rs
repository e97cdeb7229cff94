use std::sync::Arc;

use sysrag_core::traits::Embedder;
use sysrag_core::types::Candidate;
use sysrag_core::{Error, Result};

use super::{cosine, embed, CompressionStage};

/// Drops candidates whose semantic similarity to the query is below the
/// threshold. The similarity is written to `compression_score` and is
/// unrelated to the retrieval score.
pub struct SimilarityFilter {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl SimilarityFilter {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Result<Self> {
        if !(threshold.is_finite() && (0.0..=1.0).contains(&threshold)) {
            return Err(Error::config(format!("similarity_threshold must be within [0, 1], got {threshold}")));
        }
        Ok(Self { embedder, threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl CompressionStage for SimilarityFilter {
    fn name(&self) -> &'static str {
        "similarity"
    }

    fn transform(&self, candidates: Vec<Candidate>, query: &str) -> Result<Vec<Candidate>> {
        filter(candidates, query, self.threshold, self.embedder.as_ref())
    }
}

/// Scores every candidate against `query` and keeps, in input order, those
/// scoring at least `threshold`. Returns an empty sequence when nothing passes.
pub fn filter(candidates: Vec<Candidate>, query: &str, threshold: f32, embedder: &dyn Embedder) -> Result<Vec<Candidate>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let mut texts = Vec::with_capacity(candidates.len() + 1);
    texts.push(query.to_string());
    texts.extend(candidates.iter().map(|c| c.text.clone()));
    let vectors = embed(embedder, &texts)?;
    let (query_vec, chunk_vecs) = vectors.split_at(1);

    let before = candidates.len();
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .zip(chunk_vecs)
        .filter_map(|(mut candidate, vector)| {
            let score = cosine(&query_vec[0], vector);
            candidate.compression_score = Some(score);
            (score >= threshold).then_some(candidate)
        })
        .collect();
    tracing::debug!(model = embedder.model_id(), threshold, before, after = kept.len(), "similarity filter");
    Ok(kept)
}
