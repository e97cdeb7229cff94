pub mod backend;
pub mod tantivy_utils;

pub use backend::{TantivyBackend, TantivyReader};
