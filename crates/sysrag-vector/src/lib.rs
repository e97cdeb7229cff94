pub mod backend;
pub mod schema;
pub mod table;

pub use backend::{LanceBackend, LanceReader};
