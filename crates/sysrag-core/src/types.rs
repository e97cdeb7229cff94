//! Domain types shared by the chunker, the index backends and the retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub type ChunkId = String;

/// Free-form metadata. Ordered so that serialized chunks are byte-identical across runs.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// A source document as read from the corpus. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub meta: Meta,
}

/// A bounded span of a document's text; the atomic retrievable unit.
///
/// - `id`: `"{doc_id}:{sequence_index}"`, unique within the document
/// - `doc_id`: back-reference to the owning [`Document`]
/// - `start`/`end`: byte offsets into the document text, `text == doc.text[start..end]`
/// - `sequence_index`: contiguous, starting at 0 for each document
/// - `meta`: document metadata plus chunk-local fields (`chunk_index`, `token_count`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub source_url: String,
    pub title: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub sequence_index: usize,
    pub meta: Meta,
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Vector,
    Memory,
}

/// The minimal surface returned by all engines.
///
/// `chunk_id` matches [`Chunk::id`]. `score` is engine-specific but
/// higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub doc_id: String,
    pub sequence_index: usize,
    pub title: String,
    pub source_url: String,
    pub text: String,
    pub score: f32,
    pub source: SourceKind,
}

/// A chunk retrieved for one specific query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    pub doc_id: String,
    pub sequence_index: usize,
    pub title: String,
    pub source_url: String,
    pub text: String,
    pub retrieval_score: f32,
    /// Similarity to the query, written by the similarity stage after retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_score: Option<f32>,
}

impl From<SearchHit> for Candidate {
    fn from(hit: SearchHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            doc_id: hit.doc_id,
            sequence_index: hit.sequence_index,
            title: hit.title,
            source_url: hit.source_url,
            text: hit.text,
            retrieval_score: hit.score,
            compression_score: None,
        }
    }
}

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub k: usize,
    pub compression: Option<CompressionConfig>,
}

impl Query {
    pub fn new(text: impl Into<String>, k: usize) -> Self {
        Self { text: text.into(), k, compression: None }
    }

    pub fn with_compression(mut self, config: CompressionConfig) -> Self {
        self.compression = Some(config);
        self
    }
}

/// Chunk size and overlap, both counted in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 50 }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self { chunk_size, chunk_overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A compression stage, addressed by name in [`CompressionConfig::stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Similarity,
    Redundancy,
    TokenBudget,
    Extract,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [Self::Similarity, Self::Redundancy, Self::TokenBudget, Self::Extract];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Redundancy => "redundancy",
            Self::TokenBudget => "token_budget",
            Self::Extract => "extract",
        }
    }

    pub fn needs_embeddings(self) -> bool {
        matches!(self, Self::Similarity | Self::Redundancy)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown compression stage '{s}'")))
    }
}

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.76;
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// Post-retrieval compression settings. Supplied at orchestrator
/// construction and optionally overridden per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub embedding_model: String,
    pub stages: Vec<String>,
    pub redundancy_threshold: f32,
    pub max_context_tokens: usize,
    pub max_sentences: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            stages: vec![StageKind::Similarity.as_str().to_string()],
            redundancy_threshold: 0.95,
            max_context_tokens: 2048,
            max_sentences: 8,
        }
    }
}

impl CompressionConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Parses `stages` in order. Fails on the first unknown name.
    pub fn stage_kinds(&self) -> Result<Vec<StageKind>> {
        self.stages.iter().map(|s| s.trim().parse()).collect()
    }

    /// Checks every parameter. A disabled config is always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        check_unit_interval("similarity_threshold", self.similarity_threshold)?;
        check_unit_interval("redundancy_threshold", self.redundancy_threshold)?;
        if self.max_context_tokens == 0 {
            return Err(Error::config("max_context_tokens must be positive"));
        }
        if self.max_sentences == 0 {
            return Err(Error::config("max_sentences must be positive"));
        }
        let kinds = self.stage_kinds()?;
        if kinds.iter().any(|k| k.needs_embeddings()) && self.embedding_model.trim().is_empty() {
            return Err(Error::config("embedding_model is required by the configured stages"));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::config(format!("{name} must be within [0, 1], got {value}")))
    }
}
