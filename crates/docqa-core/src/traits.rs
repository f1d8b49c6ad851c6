//! Capability interfaces for the external collaborators: embedding model,
//! similarity-search backend and generation backend.

use async_trait::async_trait;

use crate::error::{GenerationError, Result};
use crate::types::{IndexEntry, QueryFilter, QueryMatch};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hash:d384`).
    fn id(&self) -> &str;
    /// Embedding dimensionality.
    fn dim(&self) -> usize;
    /// One vector per input, same order. Failures surface as `IndexError::Embedding`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A similarity-search backend holding named collections.
///
/// Every write is atomic: either all of its effects become visible to later
/// searches or none do. Writes to one collection are serialized by the
/// backend itself, so any number of handles may share one store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;
    /// Insert or replace entries by chunk id.
    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()>;
    /// Make `entries` the complete set of chunks stored for `document_id`.
    ///
    /// Upserts the new entries and drops every other entry of the document
    /// in one commit. Returns how many stale entries were dropped.
    async fn replace_document(&self, collection: &str, document_id: &str, entries: Vec<IndexEntry>) -> Result<usize>;
    /// Nearest entries passing `filter`, by cosine distance, closest first,
    /// at most `top_k`.
    async fn search(&self, collection: &str, vector: &[f32], top_k: usize, filter: &QueryFilter) -> Result<Vec<QueryMatch>>;
    async fn count(&self, collection: &str) -> Result<usize>;
    /// Remove every entry of `document_id`. Returns how many were removed.
    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize>;
    async fn clear(&self, collection: &str) -> Result<()>;
}

/// What the composer sends to a generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub context: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    pub text: String,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<GenerationResponse, GenerationError>;
}
