use std::path::Path;
use std::sync::Arc;

use docqa_core::config::Settings;
use docqa_core::loader::DocumentLoader;
use docqa_core::traits::{Embedder, Generator, VectorStore};
use docqa_core::types::{Answer, Document, QueryFilter};
use docqa_core::{ChunkStats, Chunker, Result};
use docqa_vector::{CollectionStats, VectorIndex};
use serde::Serialize;

use crate::composer::AnswerComposer;
use crate::retriever::Retriever;

/// What one document's ingestion did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub stats: ChunkStats,
}

/// Ingestion side: chunker plus the collection's index handle.
pub struct Ingestor {
    chunker: Chunker,
    index: Arc<VectorIndex>,
}

impl Ingestor {
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::new(settings.chunking.clone())?;
        let index = Arc::new(VectorIndex::new(settings.index.collection.clone(), embedder, store)?);
        Ok(Self { chunker, index })
    }

    /// Build the embedder and backend from configuration.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder = docqa_embed::build_embedder(&settings.embedding)?;
        let store = docqa_vector::open_store(&settings.index).await?;
        Self::new(settings, embedder, store)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Chunk and index one document, replacing whatever was indexed for it before.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        let chunks = self.chunker.chunk(document);
        let stats = ChunkStats::from_chunks(&chunks);
        let written = self.index.replace_document(document.id(), &chunks).await?;
        tracing::info!(document = document.id(), chunks = written, avg_size = stats.avg_chunk_size, "ingested document");
        Ok(IngestReport { document_id: document.id().to_string(), chunks: written, stats })
    }

    /// Ingest documents in order, calling `on_done` after each one.
    ///
    /// Stops at the first failure; documents before it stay indexed.
    pub async fn ingest_all<F>(&self, documents: &[Document], mut on_done: F) -> Result<Vec<IngestReport>>
    where
        F: FnMut(&IngestReport),
    {
        let mut reports = Vec::with_capacity(documents.len());
        for doc in documents {
            let report = self.ingest(doc).await?;
            on_done(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Load `.txt`/`.md` files from a file or directory and ingest them.
    pub async fn ingest_path(&self, path: &Path) -> Result<Vec<IngestReport>> {
        let documents = DocumentLoader::new().load_path(path)?;
        self.ingest_all(&documents, |_| {}).await
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        self.index.stats().await
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        self.index.remove_document(document_id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await
    }
}

/// Ingestion and answering wired together over one collection.
pub struct Pipeline {
    ingestor: Ingestor,
    composer: AnswerComposer,
}

impl Pipeline {
    pub fn new(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        Ok(Self::from_ingestor(settings, Ingestor::new(settings, embedder, store)?, generator))
    }

    pub fn from_ingestor(settings: &Settings, ingestor: Ingestor, generator: Arc<dyn Generator>) -> Self {
        let retriever = Retriever::new(ingestor.index().clone(), settings.retrieval.clone());
        let composer = AnswerComposer::new(retriever, generator, &settings.generation);
        Self { ingestor, composer }
    }

    /// Build every backend from configuration.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let generator = docqa_llm::build_generator(&settings.generation)?;
        let ingestor = Ingestor::from_settings(settings).await?;
        Ok(Self::from_ingestor(settings, ingestor, generator))
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn composer(&self) -> &AnswerComposer {
        &self.composer
    }

    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        self.ingestor.ingest(document).await
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<Vec<IngestReport>> {
        self.ingestor.ingest_path(path).await
    }

    pub async fn ask(&self, question: &str, top_k: Option<usize>) -> Result<Answer> {
        self.composer.answer_with(question, top_k).await
    }

    /// Ask against only the chunks passing `filter`.
    pub async fn ask_filtered(&self, question: &str, top_k: Option<usize>, filter: &QueryFilter) -> Result<Answer> {
        self.composer.answer_filtered(question, top_k, filter).await
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        self.ingestor.stats().await
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        self.ingestor.remove_document(document_id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.ingestor.clear().await
    }
}
