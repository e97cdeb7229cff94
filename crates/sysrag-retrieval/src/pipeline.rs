use std::sync::Arc;

use serde::Serialize;
use sysrag_core::traits::{Embedder, EmbedderProvider};
use sysrag_core::types::{Candidate, CompressionConfig, StageKind};
use sysrag_core::{Error, Result};

use crate::compression::{CompressionStage, RedundancyFilter, SentenceExtractor, SimilarityFilter, TokenBudget};

/// Candidates that survived the pipeline and the stages that actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub candidates: Vec<Candidate>,
    pub stages_run: Vec<String>,
}

/// An ordered list of stages. A disabled pipeline returns its input untouched.
pub struct CompressionPipeline {
    enabled: bool,
    stages: Vec<Box<dyn CompressionStage>>,
}

impl CompressionPipeline {
    pub fn new(stages: Vec<Box<dyn CompressionStage>>) -> Self {
        Self { enabled: true, stages }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, stages: Vec::new() }
    }

    /// Builds the stages named in `config`, loading the embedding model only
    /// when one of them needs it.
    pub fn from_config(config: &CompressionConfig, embedders: &dyn EmbedderProvider) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let kinds = config.stage_kinds()?;
        let embedder: Option<Arc<dyn Embedder>> = if kinds.iter().any(|k| k.needs_embeddings()) {
            Some(embedders.embedder(&config.embedding_model)?)
        } else {
            None
        };

        let mut stages: Vec<Box<dyn CompressionStage>> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let stage: Box<dyn CompressionStage> = match (kind, &embedder) {
                (StageKind::Similarity, Some(e)) => Box::new(SimilarityFilter::new(e.clone(), config.similarity_threshold)?),
                (StageKind::Redundancy, Some(e)) => Box::new(RedundancyFilter::new(e.clone(), config.redundancy_threshold)),
                (StageKind::TokenBudget, _) => Box::new(TokenBudget::new(config.max_context_tokens)),
                (StageKind::Extract, _) => Box::new(SentenceExtractor::new(config.max_sentences)),
                (kind, None) => return Err(Error::config(format!("stage '{kind}' needs an embedding model"))),
            };
            stages.push(stage);
        }
        Ok(Self::new(stages))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Feeds each stage's output to the next. Stops early once a stage
    /// leaves nothing; an empty input runs no stage at all.
    pub fn run(&self, candidates: Vec<Candidate>, query: &str) -> Result<PipelineOutcome> {
        let mut current = candidates;
        let mut stages_run = Vec::new();
        if !self.enabled {
            return Ok(PipelineOutcome { candidates: current, stages_run });
        }
        for stage in &self.stages {
            if current.is_empty() {
                break;
            }
            let before = current.len();
            current = stage.transform(current, query)?;
            tracing::debug!(stage = stage.name(), before, after = current.len(), "compression stage");
            stages_run.push(stage.name().to_string());
        }
        Ok(PipelineOutcome { candidates: current, stages_run })
    }
}

/// One-shot form of [`CompressionPipeline::from_config`] followed by `run`.
pub fn run(
    candidates: Vec<Candidate>,
    query: &str,
    config: &CompressionConfig,
    embedders: &dyn EmbedderProvider,
) -> Result<PipelineOutcome> {
    CompressionPipeline::from_config(config, embedders)?.run(candidates, query)
}
