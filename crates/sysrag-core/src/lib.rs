pub mod chunker;
pub mod config;
pub mod error;
pub mod index_adapter;
pub mod ingest;
pub mod memory_backend;
pub mod ranking;
pub mod retry;
pub mod tokens;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
