use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Arrow layout of one index row. The vector width is fixed per table.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("filename", DataType::Utf8, false),
		Field::new("page", DataType::Int32, true),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("total_chunks", DataType::Int32, false),
		Field::new("range_start", DataType::Int64, false),
		Field::new("range_end", DataType::Int64, false),
		Field::new("overlap", DataType::Int32, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
