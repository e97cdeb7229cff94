//! Sentence embedding models behind [`sysrag_core::traits::Embedder`].
//!
//! `TransformerEmbedder` runs a local BERT or XLM-RoBERTa checkpoint with
//! candle; `HashingEmbedder` is a deterministic stand-in for tests and
//! machines without model files. `EmbedderRegistry` resolves model ids to
//! either and caches them.
pub mod device;
pub mod hashing;
pub mod model;
pub mod pool;
pub mod registry;
pub mod tokenize;

pub use hashing::HashingEmbedder;
pub use model::TransformerEmbedder;
pub use pool::masked_mean_l2;
pub use registry::EmbedderRegistry;
