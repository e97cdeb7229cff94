//! Layered configuration and path helpers.
//!
//! Figment merges `config.toml`, then `config.<env>.toml` (env from `RUST_ENV`,
//! `dev` by default), then `APP_*` environment variables where `__` separates
//! nesting levels (`APP_COMPRESSION__ENABLED=false`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{ChunkingConfig, CompressionConfig};

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Loads from the current directory using `RUST_ENV`.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    pub fn load_from(base_dir: &Path, env_name: &str) -> Result<Self> {
        let profile = match env_name {
            "dev" | "development" => Some("dev"),
            "prod" | "production" => Some("prod"),
            "test" | "testing" => Some("test"),
            _ => None,
        };
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(base_dir.join("config.toml")));
        if let Some(profile) = profile {
            figment = figment.merge(Toml::file(base_dir.join(format!("config.{profile}.toml"))));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment, base_dir: base_dir.to_path_buf() })
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("failed to get '{key}': {e}")))
    }

    /// The typed settings tree, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index: IndexSettings,
    pub chunking: ChunkingConfig,
    pub compression: CompressionConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.compression.validate()?;
        if self.retrieval.k == 0 {
            return Err(Error::config("retrieval.k must be positive"));
        }
        if self.retrieval.max_attempts == 0 {
            return Err(Error::config("retrieval.max_attempts must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Tantivy,
    Lancedb,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tantivy => "tantivy",
            Self::Lancedb => "lancedb",
            Self::Memory => "memory",
        })
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tantivy" => Ok(Self::Tantivy),
            "lancedb" | "lance" => Ok(Self::Lancedb),
            "memory" => Ok(Self::Memory),
            other => Err(Error::config(format!("unknown index backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: BackendKind,
    /// Relative paths resolve against the config directory.
    pub root_dir: String,
    pub name: String,
    /// Extra indexes searched together with `name`.
    pub shards: Vec<String>,
    /// Also search every other index found under `root_dir`.
    pub discover_shards: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tantivy,
            root_dir: "./data/index".to_string(),
            name: "corpus".to_string(),
            shards: Vec::new(),
            discover_shards: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { k: 10, max_attempts: 3, backoff_ms: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Directory holding one sub-directory per model id (`/` replaced by `--`).
    pub model_dir: String,
    pub max_len: usize,
    pub batch_size: usize,
    /// Model used by the vector backend to embed chunks at build time.
    pub index_model: String,
    pub use_fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_dir: "./models".to_string(),
            max_len: 512,
            batch_size: 32,
            index_model: "BAAI/bge-m3".to_string(),
            use_fake: false,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
