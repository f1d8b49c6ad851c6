//! LanceDB-backed [`VectorStore`]. One table per collection.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, RecordBatchReader, StringArray};
use arrow_schema::DataType;
use async_trait::async_trait;
use docqa_core::traits::VectorStore;
use docqa_core::types::{Chunk, ChunkMetadata, IndexEntry, QueryFilter, QueryMatch};
use docqa_core::{IndexError, Result};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};

use crate::locks::WriterLocks;
use crate::schema::build_chunk_schema;

pub struct LanceStore {
	db: Connection,
	writers: WriterLocks,
}

impl LanceStore {
	pub async fn open(path: &Path) -> Result<Self> {
		std::fs::create_dir_all(path).map_err(IndexError::unavailable)?;
		let db = connect(path.to_string_lossy().as_ref()).execute().await.map_err(IndexError::unavailable)?;
		tracing::info!(path = %path.display(), "opened lancedb");
		Ok(Self { db, writers: WriterLocks::default() })
	}

	async fn table(&self, name: &str) -> Result<Option<Table>> {
		let names = self.db.table_names().execute().await.map_err(IndexError::unavailable)?;
		if !names.iter().any(|n| n == name) {
			return Ok(None);
		}
		let table = self.db.open_table(name).execute().await.map_err(IndexError::unavailable)?;
		Ok(Some(table))
	}
}

async fn vector_dim(table: &Table) -> Result<Option<usize>> {
	let schema = table.schema().await.map_err(IndexError::unavailable)?;
	Ok(schema.field_with_name("vector").ok().and_then(|f| match f.data_type() {
		DataType::FixedSizeList(_, n) => Some(*n as usize),
		_ => None,
	}))
}

fn quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

fn document_predicate(document_id: &str) -> String {
	format!("document_id = {}", quote(document_id))
}

/// SQL predicate for `filter`, or `None` when it matches everything.
fn filter_predicate(filter: &QueryFilter) -> Option<String> {
	let mut clauses = Vec::new();
	if let Some(id) = &filter.document_id {
		clauses.push(document_predicate(id));
	}
	if let Some(name) = &filter.filename {
		clauses.push(format!("filename = {}", quote(name)));
	}
	(!clauses.is_empty()).then(|| clauses.join(" AND "))
}

fn check_dimension(entries: &[IndexEntry], dim: usize) -> Result<()> {
	if let Some(bad) = entries.iter().find(|e| e.vector.len() != dim) {
		return Err(IndexError::DimensionMismatch { expected: dim, actual: bad.vector.len() }.into());
	}
	Ok(())
}

fn reader_for(entries: &[IndexEntry], dim: usize) -> Result<Box<dyn RecordBatchReader + Send>> {
	let batch = entries_to_record_batch(entries, dim)?;
	let schema = batch.schema();
	Ok(Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema)))
}

fn entries_to_record_batch(entries: &[IndexEntry], dim: usize) -> Result<RecordBatch> {
	let schema = build_chunk_schema(dim as i32);
	let vectors = entries.iter().map(|e| Some(e.vector.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
	let batch = RecordBatch::try_new(
		schema,
		vec![
			Arc::new(StringArray::from_iter_values(entries.iter().map(IndexEntry::id))),
			Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.chunk.metadata.document_id.as_str()))),
			Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.chunk.metadata.filename.as_str()))),
			Arc::new(Int32Array::from(entries.iter().map(|e| e.chunk.metadata.page.map(|p| p as i32)).collect::<Vec<_>>())),
			Arc::new(Int32Array::from_iter_values(entries.iter().map(|e| e.chunk.metadata.chunk_index as i32))),
			Arc::new(Int32Array::from_iter_values(entries.iter().map(|e| e.chunk.metadata.total_chunks as i32))),
			Arc::new(Int64Array::from_iter_values(entries.iter().map(|e| e.chunk.range.start as i64))),
			Arc::new(Int64Array::from_iter_values(entries.iter().map(|e| e.chunk.range.end as i64))),
			Arc::new(Int32Array::from_iter_values(entries.iter().map(|e| e.chunk.overlap as i32))),
			Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.chunk.text.as_str()))),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim as i32)),
		],
	)
	.map_err(IndexError::unavailable)?;
	Ok(batch)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<T>())
		.ok_or_else(|| IndexError::Unavailable(format!("column {name} missing or mistyped")).into())
}

fn batch_to_matches(batch: &RecordBatch, out: &mut Vec<QueryMatch>) -> Result<()> {
	let document_id = column::<StringArray>(batch, "document_id")?;
	let filename = column::<StringArray>(batch, "filename")?;
	let page = column::<Int32Array>(batch, "page")?;
	let chunk_index = column::<Int32Array>(batch, "chunk_index")?;
	let total_chunks = column::<Int32Array>(batch, "total_chunks")?;
	let range_start = column::<Int64Array>(batch, "range_start")?;
	let range_end = column::<Int64Array>(batch, "range_end")?;
	let overlap = column::<Int32Array>(batch, "overlap")?;
	let text = column::<StringArray>(batch, "text")?;
	let distance = column::<Float32Array>(batch, "_distance")?;
	for i in 0..batch.num_rows() {
		let chunk = Chunk {
			text: text.value(i).to_string(),
			range: range_start.value(i) as usize..range_end.value(i) as usize,
			overlap: overlap.value(i) as usize,
			metadata: ChunkMetadata {
				document_id: document_id.value(i).to_string(),
				filename: filename.value(i).to_string(),
				page: (!page.is_null(i)).then(|| page.value(i) as u32),
				chunk_index: chunk_index.value(i) as usize,
				total_chunks: total_chunks.value(i) as usize,
			},
		};
		out.push(QueryMatch { chunk, distance: distance.value(i) });
	}
	Ok(())
}

#[async_trait]
impl VectorStore for LanceStore {
	fn name(&self) -> &str {
		"lancedb"
	}

	async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()> {
		let Some(first) = entries.first() else { return Ok(()) };
		let _writer = self.writers.acquire(collection).await;
		let table = self.table(collection).await?;
		let dim = match &table {
			Some(t) => vector_dim(t).await?.unwrap_or(first.vector.len()),
			None => first.vector.len(),
		};
		check_dimension(&entries, dim)?;
		let reader = reader_for(&entries, dim)?;
		match table {
			Some(t) => {
				let mut mi = t.merge_insert(&["id"]);
				mi.when_matched_update_all(None).when_not_matched_insert_all();
				mi.execute(reader).await.map_err(|e| IndexError::WriteConflict(e.to_string()))?;
			}
			None => {
				self.db.create_table(collection, reader).execute().await.map_err(IndexError::unavailable)?;
			}
		}
		tracing::debug!(collection, rows = entries.len(), "lancedb upsert");
		Ok(())
	}

	async fn replace_document(&self, collection: &str, document_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
		if let Some(stray) = entries.iter().find(|e| e.chunk.metadata.document_id != document_id) {
			return Err(IndexError::MalformedChunk {
				id: stray.id(),
				reason: format!("belongs to {}, not {document_id}", stray.chunk.metadata.document_id),
			}
			.into());
		}
		let _writer = self.writers.acquire(collection).await;
		let predicate = document_predicate(document_id);
		let Some(table) = self.table(collection).await? else {
			let Some(first) = entries.first() else { return Ok(0) };
			let dim = first.vector.len();
			check_dimension(&entries, dim)?;
			self.db.create_table(collection, reader_for(&entries, dim)?).execute().await.map_err(IndexError::unavailable)?;
			return Ok(0);
		};
		let stale_predicate = if entries.is_empty() {
			predicate.clone()
		} else {
			let ids: Vec<String> = entries.iter().map(|e| quote(&e.id())).collect();
			format!("{predicate} AND id NOT IN ({})", ids.join(", "))
		};
		let stale = table.count_rows(Some(stale_predicate)).await.map_err(IndexError::unavailable)?;
		if entries.is_empty() {
			if stale > 0 {
				table.delete(&predicate).await.map_err(|e| IndexError::WriteConflict(e.to_string()))?;
			}
			return Ok(stale);
		}
		let dim = vector_dim(&table).await?.unwrap_or(entries[0].vector.len());
		check_dimension(&entries, dim)?;
		// One commit: rows of this document missing from the source are deleted.
		let mut mi = table.merge_insert(&["id"]);
		mi.when_matched_update_all(None)
			.when_not_matched_insert_all()
			.when_not_matched_by_source_delete(Some(predicate));
		mi.execute(reader_for(&entries, dim)?).await.map_err(|e| IndexError::WriteConflict(e.to_string()))?;
		tracing::debug!(collection, document = document_id, rows = entries.len(), stale, "lancedb replace");
		Ok(stale)
	}

	async fn search(&self, collection: &str, vector: &[f32], top_k: usize, filter: &QueryFilter) -> Result<Vec<QueryMatch>> {
		let Some(table) = self.table(collection).await? else { return Ok(vec![]) };
		if top_k == 0 {
			return Ok(vec![]);
		}
		if let Some(dim) = vector_dim(&table).await? {
			if dim != vector.len() {
				return Err(IndexError::DimensionMismatch { expected: dim, actual: vector.len() }.into());
			}
		}
		let mut query = table
			.vector_search(vector.to_vec())
			.map_err(IndexError::unavailable)?
			.distance_type(DistanceType::Cosine)
			.limit(top_k);
		if let Some(predicate) = filter_predicate(filter) {
			query = query.only_if(predicate);
		}
		let mut stream = query.execute().await.map_err(IndexError::unavailable)?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(IndexError::unavailable)? {
			batch_to_matches(&batch, &mut hits)?;
		}
		Ok(hits)
	}

	async fn count(&self, collection: &str) -> Result<usize> {
		match self.table(collection).await? {
			Some(t) => t.count_rows(None).await.map_err(|e| IndexError::unavailable(e).into()),
			None => Ok(0),
		}
	}

	async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
		let _writer = self.writers.acquire(collection).await;
		let Some(table) = self.table(collection).await? else { return Ok(0) };
		let predicate = document_predicate(document_id);
		let removed = table.count_rows(Some(predicate.clone())).await.map_err(IndexError::unavailable)?;
		if removed > 0 {
			table.delete(&predicate).await.map_err(|e| IndexError::WriteConflict(e.to_string()))?;
		}
		Ok(removed)
	}

	async fn clear(&self, collection: &str) -> Result<()> {
		let _writer = self.writers.acquire(collection).await;
		if let Some(table) = self.table(collection).await? {
			table.delete("true").await.map_err(|e| IndexError::WriteConflict(e.to_string()))?;
		}
		Ok(())
	}
}
