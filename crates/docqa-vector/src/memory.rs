//! In-process vector backend with optional on-disk snapshots.
//!
//! Each collection is an immutable `BTreeMap` behind an `Arc`. A writer takes
//! the collection's writer lock, builds the next map from the last committed
//! one, writes its snapshot on the blocking pool (when a directory is
//! configured) and only then takes the map guard to swap it in. Readers clone
//! the `Arc` and search the last committed map.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use docqa_core::traits::VectorStore;
use docqa_core::types::{ChunkId, IndexEntry, QueryFilter, QueryMatch};
use docqa_core::{IndexError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::distance::cosine_distance;
use crate::locks::WriterLocks;

type Collection = BTreeMap<ChunkId, IndexEntry>;

#[derive(Deserialize)]
struct Snapshot {
    entries: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    entries: Vec<&'a IndexEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    writers: WriterLocks,
    dir: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store that snapshots every collection to `<dir>/<collection>.json`.
    pub fn persistent(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(IndexError::unavailable)?;
        let mut collections = HashMap::new();
        for entry in fs::read_dir(dir).map_err(IndexError::unavailable)? {
            let path = entry.map_err(IndexError::unavailable)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let file = fs::File::open(&path).map_err(IndexError::unavailable)?;
            let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| IndexError::Unavailable(format!("corrupt snapshot {}: {e}", path.display())))?;
            let map: Collection = snapshot.entries.into_iter().map(|e| (e.id(), e)).collect();
            tracing::info!(collection = %name, entries = map.len(), "loaded snapshot");
            collections.insert(name, Arc::new(map));
        }
        Ok(Self { collections: RwLock::new(collections), writers: WriterLocks::default(), dir: Some(dir.to_path_buf()) })
    }

    async fn snapshot(&self, collection: &str) -> Option<Arc<Collection>> {
        self.collections.read().await.get(collection).cloned()
    }

    /// Apply `edit` to a copy of the committed map and commit the copy.
    ///
    /// `edit` returning `Ok(None)` means nothing changed and skips the commit.
    /// Nothing becomes visible unless the snapshot write succeeded.
    async fn commit<R>(&self, collection: &str, edit: impl FnOnce(&mut Collection) -> Result<Option<R>>) -> Result<Option<R>> {
        let _writer = self.writers.acquire(collection).await;
        let mut next: Collection = self.snapshot(collection).await.map(|c| (*c).clone()).unwrap_or_default();
        let Some(out) = edit(&mut next)? else { return Ok(None) };
        let next = Arc::new(next);
        self.persist(collection, next.clone()).await?;
        self.collections.write().await.insert(collection.to_string(), next);
        Ok(Some(out))
    }

    async fn persist(&self, collection: &str, map: Arc<Collection>) -> Result<()> {
        let Some(dir) = self.dir.clone() else { return Ok(()) };
        let target = dir.join(format!("{collection}.json"));
        tokio::task::spawn_blocking(move || write_snapshot(&dir, &target, &map))
            .await
            .map_err(IndexError::unavailable)?
    }
}

fn write_snapshot(dir: &Path, target: &Path, map: &Collection) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(IndexError::unavailable)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let snapshot = SnapshotRef { entries: map.values().collect() };
        serde_json::to_writer(&mut writer, &snapshot).map_err(IndexError::unavailable)?;
        writer.flush().map_err(IndexError::unavailable)?;
    }
    tmp.as_file().sync_all().map_err(IndexError::unavailable)?;
    tmp.persist(target).map_err(IndexError::unavailable)?;
    Ok(())
}

fn dimension_of(map: &Collection) -> Option<usize> {
    map.values().next().map(|e| e.vector.len())
}

fn check_dimension(map: &Collection, entries: &[IndexEntry]) -> Result<()> {
    let Some(first) = entries.first() else { return Ok(()) };
    let expected = dimension_of(map).unwrap_or(first.vector.len());
    if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
        return Err(IndexError::DimensionMismatch { expected, actual: bad.vector.len() }.into());
    }
    Ok(())
}

fn remove_document(map: &mut Collection, document_id: &str, keep: impl Fn(&ChunkId) -> bool) -> usize {
    let before = map.len();
    map.retain(|id, e| e.chunk.metadata.document_id != document_id || keep(id));
    before - map.len()
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &str {
        if self.dir.is_some() { "memory+snapshot" } else { "memory" }
    }

    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.commit(collection, |next| {
            check_dimension(next, &entries)?;
            for entry in entries {
                next.insert(entry.id(), entry);
            }
            Ok(Some(()))
        })
        .await?;
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
        let pruned = self
            .commit(collection, |next| {
                check_dimension(next, &entries)?;
                let fresh: Vec<ChunkId> = entries.iter().map(IndexEntry::id).collect();
                let pruned = remove_document(next, document_id, |id| fresh.contains(id));
                if entries.is_empty() && pruned == 0 {
                    return Ok(None);
                }
                for entry in entries {
                    next.insert(entry.id(), entry);
                }
                Ok(Some(pruned))
            })
            .await?;
        Ok(pruned.unwrap_or(0))
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize, filter: &QueryFilter) -> Result<Vec<QueryMatch>> {
        let Some(map) = self.snapshot(collection).await else { return Ok(vec![]) };
        if top_k == 0 || map.is_empty() {
            return Ok(vec![]);
        }
        if let Some(dim) = dimension_of(&map) {
            if dim != vector.len() {
                return Err(IndexError::DimensionMismatch { expected: dim, actual: vector.len() }.into());
            }
        }
        let mut scored: Vec<(f32, &IndexEntry)> = map
            .values()
            .filter(|e| filter.matches(&e.chunk.metadata))
            .map(|e| (cosine_distance(vector, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, e)| QueryMatch { chunk: e.chunk.clone(), distance })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.snapshot(collection).await.map_or(0, |c| c.len()))
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let removed = self
            .commit(collection, |next| {
                let removed = remove_document(next, document_id, |_| false);
                Ok((removed > 0).then_some(removed))
            })
            .await?;
        Ok(removed.unwrap_or(0))
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let _writer = self.writers.acquire(collection).await;
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{collection}.json"));
            if path.exists() {
                fs::remove_file(&path).map_err(IndexError::unavailable)?;
            }
        }
        self.collections.write().await.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::types::{Chunk, ChunkMetadata};

    fn entry(doc: &str, idx: usize, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                text: format!("{doc} chunk {idx}"),
                range: 0..10,
                overlap: 0,
                metadata: ChunkMetadata {
                    document_id: doc.to_string(),
                    filename: format!("{doc}.txt"),
                    page: None,
                    chunk_index: idx,
                    total_chunks: 3,
                },
            },
            vector,
        }
    }

    #[tokio::test]
    async fn search_orders_by_distance() {
        let store = MemoryStore::new();
        store
            .upsert("c", vec![entry("a", 0, vec![1.0, 0.0]), entry("a", 1, vec![0.0, 1.0]), entry("a", 2, vec![0.7, 0.7])])
            .await
            .unwrap();
        let hits = store.search("c", &[1.0, 0.1], 3, &QueryFilter::default()).await.unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.chunk.metadata.chunk_index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn filter_applies_before_top_k() {
        let store = MemoryStore::new();
        store
            .upsert("c", vec![entry("a", 0, vec![1.0, 0.0]), entry("a", 1, vec![0.9, 0.1]), entry("b", 0, vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = store.search("c", &[1.0, 0.0], 1, &QueryFilter::document("b")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.document_id, "b");
        assert!(store.search("c", &[1.0, 0.0], 3, &QueryFilter::filename("zzz.txt")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_dimension_rejects_whole_batch() {
        let store = MemoryStore::new();
        store.upsert("c", vec![entry("a", 0, vec![1.0, 0.0])]).await.unwrap();
        let err = store.upsert("c", vec![entry("a", 1, vec![0.0, 1.0]), entry("a", 2, vec![1.0, 0.0, 0.0])]).await;
        assert!(err.is_err());
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_document_swaps_the_whole_document() {
        let store = MemoryStore::new();
        let entries = (0..3).map(|i| entry("a", i, vec![1.0, 0.0])).chain([entry("b", 0, vec![0.0, 1.0])]).collect();
        store.upsert("c", entries).await.unwrap();

        let pruned = store.replace_document("c", "a", vec![entry("a", 0, vec![0.5, 0.5])]).await.unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(store.count("c").await.unwrap(), 2);
        let a = store.search("c", &[0.5, 0.5], 5, &QueryFilter::document("a")).await.unwrap();
        assert_eq!(a.len(), 1);

        let stray = store.replace_document("c", "a", vec![entry("b", 1, vec![1.0, 0.0])]).await;
        assert!(stray.is_err());
        assert_eq!(store.count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_document_removes_every_chunk() {
        let store = MemoryStore::new();
        let entries = (0..3).map(|i| entry("a", i, vec![1.0, 0.0])).chain([entry("b", 0, vec![0.0, 1.0])]).collect();
        store.upsert("c", entries).await.unwrap();
        assert_eq!(store.delete_document("c", "a").await.unwrap(), 3);
        assert_eq!(store.count("c").await.unwrap(), 1);
        assert_eq!(store.delete_document("c", "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshots_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = MemoryStore::persistent(tmp.path()).unwrap();
            store.upsert("docs", vec![entry("a", 0, vec![1.0, 0.0]), entry("a", 1, vec![0.0, 1.0])]).await.unwrap();
        }
        let reopened = MemoryStore::persistent(tmp.path()).unwrap();
        assert_eq!(reopened.count("docs").await.unwrap(), 2);
        let hits = reopened.search("docs", &[0.0, 1.0], 1, &QueryFilter::default()).await.unwrap();
        assert_eq!(hits[0].chunk.metadata.chunk_index, 1);

        reopened.clear("docs").await.unwrap();
        assert!(!tmp.path().join("docs.json").exists());
        assert_eq!(MemoryStore::persistent(tmp.path()).unwrap().count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_committed_state_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let store = MemoryStore::persistent(&dir).unwrap();
        store.upsert("docs", (0..3).map(|i| entry("a", i, vec![1.0, 0.0])).collect()).await.unwrap();

        fs::remove_dir_all(&dir).unwrap();
        let result = store.replace_document("docs", "a", vec![entry("a", 0, vec![0.0, 1.0])]).await;
        assert!(result.is_err());

        let hits = store.search("docs", &[1.0, 0.0], 10, &QueryFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.chunk.metadata.total_chunks == 3 && h.distance < 1e-6));
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_an_in_flight_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::persistent(tmp.path()).unwrap();
        store.upsert("docs", vec![entry("a", 0, vec![1.0, 0.0])]).await.unwrap();

        let writing = store.writers.acquire("docs").await;
        let search = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            store.search("docs", &[1.0, 0.0], 1, &QueryFilter::default()),
        )
        .await;
        assert_eq!(search.expect("search must not block on the writer").unwrap().len(), 1);
        assert_eq!(store.count("docs").await.unwrap(), 1);
        drop(writing);
    }
}
