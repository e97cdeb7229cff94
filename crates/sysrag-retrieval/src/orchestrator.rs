use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use sysrag_core::index_adapter::{validate_index_name, IndexAdapter};
use sysrag_core::traits::EmbedderProvider;
use sysrag_core::types::{Candidate, CompressionConfig, Query};
use sysrag_core::{Error, Result};

use crate::pipeline::{CompressionPipeline, PipelineOutcome};

/// Candidates kept when compression removes everything.
const FALLBACK_CANDIDATES: usize = 3;

/// Per-request numbers for observability and threshold tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub candidates_before: usize,
    pub candidates_after: usize,
    pub fallback_used: bool,
    pub stages_run: Vec<String>,
    /// The embedding model was unavailable and compression was bypassed.
    pub compression_skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub candidates: Vec<Candidate>,
    pub diagnostics: Diagnostics,
}

/// Either a non-empty context or an explicit "nothing found" signal.
#[derive(Debug, Clone)]
pub enum ContextOutcome {
    Found(RetrievedContext),
    NoRelevantDocuments(Diagnostics),
}

impl ContextOutcome {
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            Self::Found(ctx) => &ctx.diagnostics,
            Self::NoRelevantDocuments(diag) => diag,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Found(ctx) => &ctx.candidates,
            Self::NoRelevantDocuments(_) => &[],
        }
    }

    pub fn into_context(self) -> Option<RetrievedContext> {
        match self {
            Self::Found(ctx) => Some(ctx),
            Self::NoRelevantDocuments(_) => None,
        }
    }
}

/// Search followed by compression, over one index or several shards.
///
/// The adapter and the model registry are handed in at construction. The
/// default compression config can be replaced while queries are running.
pub struct Retriever {
    adapter: Arc<IndexAdapter>,
    embedders: Arc<dyn EmbedderProvider>,
    index_names: Vec<String>,
    compression: RwLock<CompressionConfig>,
}

impl Retriever {
    pub fn new(
        adapter: Arc<IndexAdapter>,
        embedders: Arc<dyn EmbedderProvider>,
        index_name: impl Into<String>,
        compression: CompressionConfig,
    ) -> Result<Self> {
        let index_name = index_name.into();
        validate_index_name(&index_name)?;
        compression.validate()?;
        Ok(Self { adapter, embedders, index_names: vec![index_name], compression: RwLock::new(compression) })
    }

    /// Searches `index_name` as an additional shard.
    pub fn with_shard(mut self, index_name: impl Into<String>) -> Result<Self> {
        let index_name = index_name.into();
        validate_index_name(&index_name)?;
        if !self.index_names.contains(&index_name) {
            self.index_names.push(index_name);
        }
        Ok(self)
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    pub fn compression(&self) -> CompressionConfig {
        self.compression.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the default config. An invalid config is rejected and the
    /// current one stays in place.
    pub fn set_compression(&self, config: CompressionConfig) -> Result<()> {
        config.validate()?;
        *self.compression.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn answer_context(&self, query: &Query) -> Result<ContextOutcome> {
        if query.text.trim().is_empty() {
            return Err(Error::config("query text is empty"));
        }
        if query.k == 0 {
            return Err(Error::config("k must be positive"));
        }
        let config = match &query.compression {
            Some(config) => config.clone(),
            None => self.compression(),
        };
        config.validate()?;

        let candidates = self.search(&query.text, query.k)?;
        let mut diagnostics = Diagnostics { candidates_before: candidates.len(), ..Diagnostics::default() };
        if candidates.is_empty() {
            tracing::info!(query = %query.text, "no relevant documents");
            return Ok(ContextOutcome::NoRelevantDocuments(diagnostics));
        }

        let compressed = match self.compress(&config, candidates.clone(), &query.text) {
            Ok(outcome) => outcome,
            Err(err @ Error::EmbeddingUnavailable { .. }) => {
                tracing::warn!(error = %err, "compression skipped for this request");
                diagnostics.compression_skipped = true;
                PipelineOutcome { candidates: candidates.clone(), stages_run: Vec::new() }
            }
            Err(err) => return Err(err),
        };
        diagnostics.stages_run = compressed.stages_run;

        let kept = if compressed.candidates.is_empty() {
            let take = query.k.min(FALLBACK_CANDIDATES);
            tracing::warn!(
                before = diagnostics.candidates_before,
                threshold = config.similarity_threshold,
                kept = take.min(candidates.len()),
                "compression removed every candidate, falling back to top results"
            );
            diagnostics.fallback_used = true;
            candidates.into_iter().take(take).collect()
        } else {
            compressed.candidates
        };
        diagnostics.candidates_after = kept.len();
        tracing::info!(
            before = diagnostics.candidates_before,
            after = diagnostics.candidates_after,
            fallback = diagnostics.fallback_used,
            "context assembled"
        );
        Ok(ContextOutcome::Found(RetrievedContext { candidates: kept, diagnostics }))
    }

    fn search(&self, text: &str, k: usize) -> Result<Vec<Candidate>> {
        match self.index_names.as_slice() {
            [single] => self.adapter.search(single, text, k),
            names => self.adapter.search_shards(names, text, k),
        }
    }

    fn compress(&self, config: &CompressionConfig, candidates: Vec<Candidate>, query: &str) -> Result<PipelineOutcome> {
        CompressionPipeline::from_config(config, self.embedders.as_ref())?.run(candidates, query)
    }
}
