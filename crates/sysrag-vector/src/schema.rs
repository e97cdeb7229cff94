use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// One row per chunk; `vector` width is the embedder's dimension.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("doc_id", DataType::Utf8, false),
		Field::new("source_url", DataType::Utf8, false),
		Field::new("title", DataType::Utf8, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("seq", DataType::Int64, false),
		Field::new("content_hash", DataType::Utf8, false),
		Field::new("meta", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
