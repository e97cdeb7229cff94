use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sysrag_core::config::{resolve_with_base, EmbeddingSettings};
use sysrag_core::traits::{Embedder, EmbedderProvider};
use sysrag_core::{Error, Result};

use crate::hashing::{HashingEmbedder, DEFAULT_HASHING_DIM};
use crate::model::TransformerEmbedder;

/// Loads embedding models on first use and shares them afterwards.
///
/// A model id `org/name` resolves to `<model_dir>/org--name`. The id
/// `hashing` (or `hashing:<dim>`) always selects [`HashingEmbedder`]; with
/// `use_fake` set every id does. Failed loads are not cached.
pub struct EmbedderRegistry {
    model_dir: PathBuf,
    max_len: usize,
    batch_size: usize,
    use_fake: bool,
    cache: Mutex<HashMap<String, Arc<dyn Embedder>>>,
}

impl EmbedderRegistry {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            max_len: 512,
            batch_size: 32,
            use_fake: false,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `APP_MODEL_DIR` wins over `embedding.model_dir`; `APP_USE_FAKE_EMBEDDINGS=1`
    /// forces the hashing embedder.
    pub fn from_settings(settings: &EmbeddingSettings, base_dir: &Path) -> Self {
        let model_dir = match std::env::var("APP_MODEL_DIR") {
            Ok(dir) if !dir.is_empty() => resolve_with_base(base_dir, dir),
            _ => resolve_with_base(base_dir, &settings.model_dir),
        };
        let env_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self::new(model_dir)
            .with_max_len(settings.max_len)
            .with_batch_size(settings.batch_size)
            .with_fake(settings.use_fake || env_fake)
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_fake(mut self, use_fake: bool) -> Self {
        self.use_fake = use_fake;
        self
    }

    /// Registers an already constructed model under `model_id`.
    pub fn insert(&self, model_id: impl Into<String>, embedder: Arc<dyn Embedder>) {
        self.lock().insert(model_id.into(), embedder);
    }

    pub fn model_path(&self, model_id: &str) -> PathBuf {
        self.model_dir.join(model_id.replace('/', "--"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Embedder>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, model_id: &str) -> anyhow::Result<Arc<dyn Embedder>> {
        if let Some(dim) = hashing_dim(model_id) {
            return Ok(Arc::new(HashingEmbedder::new(dim).with_model_id(model_id)));
        }
        if self.use_fake {
            tracing::info!(model = model_id, "using hashing embedder in place of model");
            return Ok(Arc::new(HashingEmbedder::default().with_model_id(model_id)));
        }
        let dir = self.model_path(model_id);
        if !dir.is_dir() {
            anyhow::bail!("model directory {} not found", dir.display());
        }
        Ok(Arc::new(TransformerEmbedder::load(model_id, &dir, self.max_len, self.batch_size)?))
    }
}

fn hashing_dim(model_id: &str) -> Option<usize> {
    match model_id.strip_prefix("hashing") {
        Some("") => Some(DEFAULT_HASHING_DIM),
        Some(rest) => rest.strip_prefix(':').and_then(|d| d.parse().ok()),
        None => None,
    }
}

impl EmbedderProvider for EmbedderRegistry {
    fn embedder(&self, model_id: &str) -> Result<Arc<dyn Embedder>> {
        if let Some(found) = self.lock().get(model_id) {
            return Ok(found.clone());
        }
        // Loading can take seconds; the cache is not locked meanwhile.
        let loaded = self.load(model_id).map_err(|e| {
            tracing::warn!(model = model_id, error = %e, "embedding model unavailable");
            Error::embedding_unavailable(model_id, format!("{e:#}"))
        })?;
        Ok(self.lock().entry(model_id.to_string()).or_insert(loaded).clone())
    }
}
