//! docqa-vector
//!
//! [`VectorIndex`] is the per-collection handle used by ingestion and
//! retrieval. It owns the embedder and a [`VectorStore`] backend, validates
//! chunks before they reach the backend and normalizes ranked results.
//! Writers are serialized per collection by the backend, so any number of
//! handles may share one store.

use std::collections::BTreeMap;
use std::sync::Arc;

use docqa_core::config::{expand_path, BackendKind, IndexConfig};
use docqa_core::traits::{Embedder, VectorStore};
use docqa_core::types::{Chunk, ChunkId, IndexEntry, QueryFilter, QueryMatch};
use docqa_core::{Error, IndexError, Result};
use serde::Serialize;

pub mod distance;
mod locks;
pub mod memory;

#[cfg(feature = "lance")]
pub mod lance;
#[cfg(feature = "lance")]
pub mod schema;

pub use memory::MemoryStore;

#[cfg(feature = "lance")]
pub use lance::LanceStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub backend: String,
    pub embedder: String,
    pub entries: usize,
}

pub struct VectorIndex {
    collection: String,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl VectorIndex {
    pub fn new(collection: impl Into<String>, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Result<Self> {
        let collection = collection.into();
        let valid = !collection.is_empty()
            && collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::config(format!(
                "collection name {collection:?} must be non-empty and use only letters, digits, '_' or '-'"
            )));
        }
        Ok(Self { collection, embedder, store })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed and write `chunks`, replacing entries with the same id.
    ///
    /// Returns the number of distinct chunk ids written. Nothing is written if
    /// any chunk is malformed or embedding fails.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        let entries = self.prepare(chunks).await?;
        let written = entries.len();
        if written == 0 {
            return Ok(0);
        }
        self.store.upsert(&self.collection, entries).await?;
        tracing::info!(collection = %self.collection, chunks = written, "upserted chunks");
        Ok(written)
    }

    /// Make `chunks` the complete indexed content of `document_id`.
    ///
    /// The new chunks and the removal of any older chunks of the document
    /// land in one backend commit, so readers never see a mix of versions.
    pub async fn replace_document(&self, document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        if let Some(stray) = chunks.iter().find(|c| c.metadata.document_id != document_id) {
            return Err(IndexError::MalformedChunk {
                id: stray.id(),
                reason: format!("belongs to {}, not {document_id}", stray.metadata.document_id),
            }
            .into());
        }
        let entries = self.prepare(chunks).await?;
        let written = entries.len();
        let pruned = self.store.replace_document(&self.collection, document_id, entries).await?;
        tracing::info!(collection = %self.collection, document = document_id, chunks = written, pruned, "replaced document");
        Ok(written)
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let removed = self.store.delete_document(&self.collection, document_id).await?;
        tracing::info!(collection = %self.collection, document = document_id, removed, "removed document");
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear(&self.collection).await?;
        tracing::info!(collection = %self.collection, "cleared collection");
        Ok(())
    }

    /// Nearest chunks to `text`, closest first, at most `top_k`.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<QueryMatch>> {
        self.query_filtered(text, top_k, &QueryFilter::default()).await
    }

    /// Like [`VectorIndex::query`], restricted to chunks passing `filter`.
    ///
    /// Reads the last committed state and never waits on a writer.
    pub async fn query_filtered(&self, text: &str, top_k: usize, filter: &QueryFilter) -> Result<Vec<QueryMatch>> {
        if top_k == 0 {
            return Ok(vec![]);
        }
        let vector = self.embed_one(text).await?;
        let mut matches = self.store.search(&self.collection, &vector, top_k, filter).await?;
        matches.retain(|m| filter.matches(&m.chunk.metadata));
        for m in matches.iter_mut() {
            if m.distance.is_nan() {
                m.distance = f32::MAX;
            }
            m.distance = m.distance.max(0.0);
        }
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.chunk.id().cmp(&b.chunk.id())));
        matches.truncate(top_k);
        tracing::debug!(collection = %self.collection, top_k, filtered = !filter.is_empty(), hits = matches.len(), "query");
        Ok(matches)
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(&self.collection).await
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            collection: self.collection.clone(),
            backend: self.store.name().to_string(),
            embedder: self.embedder.id().to_string(),
            entries: self.count().await?,
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed_batch(&[text.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| IndexError::Embedding("embedder returned no vector".into()))?;
        self.check_dim(vector.len())?;
        Ok(vector)
    }

    fn check_dim(&self, actual: usize) -> Result<()> {
        let expected = self.embedder.dim();
        if actual != expected {
            return Err(IndexError::DimensionMismatch { expected, actual }.into());
        }
        Ok(())
    }

    /// Validate, dedupe (last id wins) and embed.
    async fn prepare(&self, chunks: &[Chunk]) -> Result<Vec<IndexEntry>> {
        let mut unique: BTreeMap<ChunkId, &Chunk> = BTreeMap::new();
        for chunk in chunks {
            if chunk.text.trim().is_empty() {
                return Err(IndexError::MalformedChunk { id: chunk.id(), reason: "empty text".into() }.into());
            }
            unique.insert(chunk.id(), chunk);
        }
        if unique.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = unique.values().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(format!("expected {} vectors, got {}", texts.len(), vectors.len())).into());
        }
        unique
            .into_values()
            .zip(vectors)
            .map(|(chunk, vector)| -> Result<IndexEntry> {
                self.check_dim(vector.len())?;
                Ok(IndexEntry { chunk: chunk.clone(), vector })
            })
            .collect()
    }
}

/// Build the configured backend.
pub async fn open_store(config: &IndexConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend {
        BackendKind::Memory => match &config.path {
            Some(path) => {
                let dir = expand_path(path);
                tracing::info!(path = %dir.display(), "using persistent memory store");
                Ok(Arc::new(MemoryStore::persistent(&dir)?))
            }
            None => Ok(Arc::new(MemoryStore::new())),
        },
        #[cfg(feature = "lance")]
        BackendKind::Lance => {
            let path = config.path.as_deref().ok_or_else(|| Error::config("index.path is required for the lance backend"))?;
            Ok(Arc::new(LanceStore::open(&expand_path(path)).await?))
        }
        #[cfg(not(feature = "lance"))]
        BackendKind::Lance => Err(Error::config("lance backend requested but docqa-vector was built without the `lance` feature")),
    }
}
