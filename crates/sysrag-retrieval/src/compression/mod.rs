//! Compression stages.
//!
//! Every stage takes the ordered candidates plus the query and returns an
//! ordered candidate sequence; the [`crate::pipeline::CompressionPipeline`]
//! composes them by iteration.

use sysrag_core::traits::Embedder;
use sysrag_core::types::Candidate;
use sysrag_core::{Error, Result};

pub mod budget;
pub mod extract;
pub mod redundancy;
pub mod similarity;

pub use budget::TokenBudget;
pub use extract::SentenceExtractor;
pub use redundancy::RedundancyFilter;
pub use similarity::{filter, SimilarityFilter};

pub trait CompressionStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn transform(&self, candidates: Vec<Candidate>, query: &str) -> Result<Vec<Candidate>>;
}

/// Cosine similarity clamped to `[0, 1]`. NaN and mismatched lengths count as 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let sim = dot / (na.sqrt() * nb.sqrt());
    if sim.is_nan() {
        0.0
    } else {
        sim.clamp(0.0, 1.0)
    }
}

/// Embeds `texts` and checks the model answered with one vector per text.
pub(crate) fn embed(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder
        .embed_batch(texts)
        .map_err(|e| Error::embedding_unavailable(embedder.model_id(), format!("{e:#}")))?;
    if vectors.len() != texts.len() {
        return Err(Error::embedding_unavailable(
            embedder.model_id(),
            format!("returned {} vectors for {} texts", vectors.len(), texts.len()),
        ));
    }
    Ok(vectors)
}
