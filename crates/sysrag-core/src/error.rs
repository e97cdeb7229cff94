use thiserror::Error;

/// Failure taxonomy shared by every crate in the workspace.
///
/// `Config` is the caller's fault and never retriable. The index state
/// errors (`IndexNotFound`, `IndexExists`, `IndexBuildInProgress`) are
/// recoverable once the caller fixes the state. `EmbeddingUnavailable`
/// means an infrastructure dependency is down.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("index '{0}' already exists (pass rebuild to replace it)")]
    IndexExists(String),

    #[error("index '{0}' is being built")]
    IndexBuildInProgress(String),

    #[error("build of index '{0}' was cancelled")]
    BuildCancelled(String),

    #[error("embedding model '{model}' unavailable: {reason}")]
    EmbeddingUnavailable { model: String, reason: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn embedding_unavailable(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::EmbeddingUnavailable { model: model.into(), reason: reason.to_string() }
    }

    /// Whether retrying the same call later can succeed without changing its inputs.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::IndexBuildInProgress(_) | Self::EmbeddingUnavailable { .. } | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
