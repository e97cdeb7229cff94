use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Chunk, SearchHit};

/// Sentence embedding model. Implementations return L2-normalized vectors
/// of `dim()` components, one per input text, in input order.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Resolves an embedding model identifier to a loaded, shareable model.
///
/// Fails with [`crate::Error::EmbeddingUnavailable`] when the model cannot be loaded.
pub trait EmbedderProvider: Send + Sync {
    fn embedder(&self, model_id: &str) -> Result<Arc<dyn Embedder>>;
}

/// A built, immutable generation of an index.
pub trait IndexReader: Send + Sync {
    /// At most `k` hits in [`crate::ranking::hit_order`]. Which hits make
    /// the cut also follows that order, so a tie at the k-th slot goes to
    /// the lower sequence index, then the lower chunk id.
    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
    fn num_chunks(&self) -> usize;
}

/// A search engine able to hold several generations of a named index.
///
/// `build` writes a staging generation that is invisible until `activate`
/// is called for it; `discard` removes a generation's storage.
pub trait IndexBackend: Send + Sync {
    fn build(
        &self,
        name: &str,
        generation: u64,
        chunks: &[Chunk],
        cancel: &CancelToken,
    ) -> anyhow::Result<Arc<dyn IndexReader>>;

    fn activate(&self, name: &str, generation: u64) -> anyhow::Result<()>;

    /// The persisted active generation of `name`, if any.
    fn open_active(&self, name: &str) -> anyhow::Result<Option<(u64, Arc<dyn IndexReader>)>>;

    fn discard(&self, name: &str, generation: u64) -> anyhow::Result<()>;

    /// Names that have an active generation. Backends unable to list their
    /// indexes report none.
    fn index_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Cooperative cancellation flag shared between a build and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
