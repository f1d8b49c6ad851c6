use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docqa_core::config::ChunkingConfig;
use docqa_core::traits::VectorStore;
use docqa_core::types::{Chunk, Document, IndexEntry, QueryFilter, QueryMatch};
use docqa_core::{Chunker, Error, IndexError, Result};
use docqa_embed::HashEmbedder;
use docqa_vector::{MemoryStore, VectorIndex};

fn index_with(store: Arc<dyn VectorStore>) -> VectorIndex {
    VectorIndex::new("test_docs", Arc::new(HashEmbedder::new(256)), store).expect("index")
}

fn chunks_of(id: &str, text: &str, max_size: usize) -> Vec<Chunk> {
    let chunker = Chunker::new(ChunkingConfig::new(max_size, 10, &["\n\n", ". ", " ", ""])).expect("chunker");
    chunker.chunk(&Document::new(id, format!("{id}.txt"), text))
}

const MANUAL: &str = "The pump must be primed before first use.\n\n\
Replace the intake filter every three months.\n\n\
Store the generator in a dry shed away from fuel cans.\n\n\
Water tanks should be cleaned each spring with diluted bleach.";

#[tokio::test]
async fn self_retrieval_ranks_exact_chunk_first() {
    let index = index_with(Arc::new(MemoryStore::new()));
    let chunks = chunks_of("manual", MANUAL, 70);
    assert!(chunks.len() >= 3);
    assert_eq!(index.upsert(&chunks).await.unwrap(), chunks.len());

    for chunk in &chunks {
        let hits = index.query(&chunk.text, 3).await.unwrap();
        assert_eq!(hits[0].chunk.id(), chunk.id());
        assert!(hits[0].relevance() >= 0.99, "relevance {}", hits[0].relevance());
    }
}

#[tokio::test]
async fn empty_index_returns_no_matches() {
    let index = index_with(Arc::new(MemoryStore::new()));
    assert!(index.query("anything at all", 5).await.unwrap().is_empty());
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn top_k_larger_than_index_returns_everything_in_order() {
    let index = index_with(Arc::new(MemoryStore::new()));
    let chunks = chunks_of("manual", MANUAL, 70);
    index.upsert(&chunks).await.unwrap();

    let hits = index.query("filter", 100).await.unwrap();
    assert_eq!(hits.len(), chunks.len());
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!(hits.iter().all(|h| h.distance >= 0.0));
    assert!(index.query("filter", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn reupsert_keeps_entry_count() {
    let index = index_with(Arc::new(MemoryStore::new()));
    let chunks = chunks_of("manual", MANUAL, 70);
    index.upsert(&chunks).await.unwrap();
    let before = index.count().await.unwrap();
    index.upsert(&chunks).await.unwrap();
    index.upsert(&chunks[..1]).await.unwrap();
    assert_eq!(index.count().await.unwrap(), before);
}

#[tokio::test]
async fn duplicate_ids_in_one_batch_count_once_and_last_wins() {
    let index = index_with(Arc::new(MemoryStore::new()));
    let mut chunks = chunks_of("manual", MANUAL, 70);
    let mut replacement = chunks[0].clone();
    replacement.text = "Completely different replacement wording".into();
    chunks.push(replacement.clone());

    let written = index.upsert(&chunks).await.unwrap();
    assert_eq!(written, chunks.len() - 1);
    let hits = index.query(&replacement.text, 1).await.unwrap();
    assert_eq!(hits[0].chunk.text, replacement.text);
}

#[tokio::test]
async fn blank_chunk_is_rejected_before_backend() {
    let store = Arc::new(CountingStore::default());
    let index = index_with(store.clone());
    let mut chunks = chunks_of("manual", MANUAL, 70);
    chunks[1].text = "   ".into();

    let err = index.upsert(&chunks).await.unwrap_err();
    assert!(matches!(err, Error::Index(IndexError::MalformedChunk { .. })));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backend_failure_surfaces_and_is_not_retried() {
    let store = Arc::new(CountingStore { fail: true, ..Default::default() });
    let index = index_with(store.clone());
    let err = index.upsert(&chunks_of("manual", MANUAL, 70)).await.unwrap_err();
    assert!(matches!(err, Error::Index(IndexError::Unavailable(_))));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
    assert!(index.query("pump", 3).await.is_err());
}

#[tokio::test]
async fn replace_document_prunes_stale_tail() {
    let index = index_with(Arc::new(MemoryStore::new()));
    index.upsert(&chunks_of("manual", MANUAL, 70)).await.unwrap();
    index.upsert(&chunks_of("other", "Unrelated note about seeds.", 70)).await.unwrap();

    let shorter = chunks_of("manual", "The pump must be primed before first use.", 70);
    assert_eq!(shorter.len(), 1);
    index.replace_document("manual", &shorter).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 2);

    assert_eq!(index.remove_document("manual").await.unwrap(), 1);
    assert_eq!(index.count().await.unwrap(), 1);
    index.clear().await.unwrap();
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn replace_document_does_not_depend_on_a_separate_prune() {
    let store = Arc::new(DeleteFails(MemoryStore::new()));
    let index = index_with(store.clone());
    index.upsert(&chunks_of("manual", MANUAL, 70)).await.unwrap();

    let shorter = chunks_of("manual", "The pump must be primed before first use.", 70);
    index.replace_document("manual", &shorter).await.unwrap();

    let hits = index.query("pump", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|h| h.chunk.metadata.total_chunks == 1));
    assert!(index.remove_document("manual").await.is_err());
}

#[tokio::test]
async fn failed_replace_keeps_previous_version_intact() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("index");
    let index = index_with(Arc::new(MemoryStore::persistent(&dir).unwrap()));
    let original = chunks_of("manual", MANUAL, 70);
    index.upsert(&original).await.unwrap();

    std::fs::remove_dir_all(&dir).unwrap();
    let shorter = chunks_of("manual", "Completely rewritten single paragraph.", 70);
    assert!(index.replace_document("manual", &shorter).await.is_err());

    let hits = index.query("pump", 10).await.unwrap();
    assert_eq!(hits.len(), original.len());
    assert!(hits.iter().all(|h| h.chunk.metadata.total_chunks == original.len()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handles_sharing_a_store_never_interleave_replacements() {
    let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
    let first = Arc::new(index_with(store.clone()));
    let second = Arc::new(index_with(store.clone()));
    let long = chunks_of("manual", MANUAL, 70);
    let short = chunks_of("manual", "The pump must be primed before first use.", 70);

    for _ in 0..25 {
        let (a, b) = (first.clone(), second.clone());
        let (long, short) = (long.clone(), short.clone());
        let ta = tokio::spawn(async move { a.replace_document("manual", &long).await });
        let tb = tokio::spawn(async move { b.replace_document("manual", &short).await });
        ta.await.unwrap().unwrap();
        tb.await.unwrap().unwrap();

        let hits = first.query("pump", 10).await.unwrap();
        let total = hits[0].chunk.metadata.total_chunks;
        assert_eq!(hits.len(), total);
        assert!(hits.iter().all(|h| h.chunk.metadata.total_chunks == total));
    }
}

#[tokio::test]
async fn filtered_query_only_ranks_matching_chunks() {
    let index = index_with(Arc::new(MemoryStore::new()));
    index.upsert(&chunks_of("manual", MANUAL, 70)).await.unwrap();
    index.upsert(&chunks_of("garden", "Plant beans after the last frost.", 70)).await.unwrap();

    let hits = index.query_filtered("pump primed before first use", 1, &QueryFilter::document("garden")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.metadata.document_id, "garden");

    let by_file = index.query_filtered("filter", 10, &QueryFilter::filename("manual.txt")).await.unwrap();
    assert_eq!(by_file.len(), chunks_of("manual", MANUAL, 70).len());
    assert!(by_file.iter().all(|h| h.chunk.metadata.filename == "manual.txt"));

    let none = index.query_filtered("filter", 10, &QueryFilter::document("missing")).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn concurrent_ingestion_into_one_collection() {
    let index = Arc::new(index_with(Arc::new(MemoryStore::new())));
    let a = chunks_of("a", MANUAL, 70);
    let b = chunks_of("b", MANUAL, 70);
    let (ra, rb) = tokio::join!(index.upsert(&a), index.upsert(&b));
    assert_eq!(ra.unwrap() + rb.unwrap(), a.len() + b.len());
    assert_eq!(index.count().await.unwrap(), a.len() + b.len());
}

#[tokio::test]
async fn stats_and_name_validation() {
    let index = index_with(Arc::new(MemoryStore::new()));
    index.upsert(&chunks_of("manual", MANUAL, 70)).await.unwrap();
    let stats = index.stats().await.unwrap();
    assert_eq!(stats.collection, "test_docs");
    assert_eq!(stats.backend, "memory");
    assert_eq!(stats.embedder, "hash:d256");
    assert!(stats.entries > 0);

    let bad = VectorIndex::new("bad name!", Arc::new(HashEmbedder::new(8)), Arc::new(MemoryStore::new()));
    assert!(matches!(bad, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn persistent_store_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let chunks = chunks_of("manual", MANUAL, 70);
    {
        let index = index_with(Arc::new(MemoryStore::persistent(tmp.path()).unwrap()));
        index.upsert(&chunks).await.unwrap();
    }
    let index = index_with(Arc::new(MemoryStore::persistent(tmp.path()).unwrap()));
    assert_eq!(index.count().await.unwrap(), chunks.len());
    let hits = index.query(&chunks[2].text, 1).await.unwrap();
    assert_eq!(hits[0].chunk, chunks[2]);
}

#[derive(Default)]
struct CountingStore {
    fail: bool,
    upserts: AtomicUsize,
}

#[async_trait]
impl VectorStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    async fn upsert(&self, _collection: &str, _entries: Vec<IndexEntry>) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(IndexError::Unavailable("connection refused".into()).into());
        }
        Ok(())
    }

    async fn replace_document(&self, collection: &str, _document_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        self.upsert(collection, entries).await?;
        Ok(0)
    }

    async fn search(&self, _collection: &str, _vector: &[f32], _top_k: usize, _filter: &QueryFilter) -> Result<Vec<QueryMatch>> {
        if self.fail {
            return Err(IndexError::Unavailable("connection refused".into()).into());
        }
        Ok(vec![])
    }

    async fn count(&self, _collection: &str) -> Result<usize> {
        Ok(0)
    }

    async fn delete_document(&self, _collection: &str, _document_id: &str) -> Result<usize> {
        Ok(0)
    }

    async fn clear(&self, _collection: &str) -> Result<()> {
        Ok(())
    }
}

/// Memory backend whose standalone delete always fails.
struct DeleteFails(MemoryStore);

#[async_trait]
impl VectorStore for DeleteFails {
    fn name(&self) -> &str {
        "delete-fails"
    }

    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()> {
        self.0.upsert(collection, entries).await
    }

    async fn replace_document(&self, collection: &str, document_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        self.0.replace_document(collection, document_id, entries).await
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize, filter: &QueryFilter) -> Result<Vec<QueryMatch>> {
        self.0.search(collection, vector, top_k, filter).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.0.count(collection).await
    }

    async fn delete_document(&self, _collection: &str, _document_id: &str) -> Result<usize> {
        Err(IndexError::WriteConflict("delete rejected".into()).into())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.0.clear(collection).await
    }
}
