//! Domain types shared by the chunker, the vector index and the answer composer.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// `"{document_id}:{chunk_index}"`, unique inside a collection.
pub type ChunkId = String;

/// Character offsets at which each page of a document starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMap {
    starts: Vec<usize>,
}

impl PageMap {
    pub fn new(mut starts: Vec<usize>) -> Self {
        starts.sort_unstable();
        starts.dedup();
        Self { starts }
    }

    /// A document that is a single page.
    pub fn single() -> Self {
        Self { starts: vec![0] }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// 1-based page number containing the character `offset`.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        if self.starts.is_empty() {
            return None;
        }
        let idx = self.starts.partition_point(|&start| start <= offset).max(1);
        u32::try_from(idx).ok()
    }
}

/// Where a document came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub filename: String,
    pub pages: PageMap,
}

/// Raw extracted document text. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: String,
    text: String,
    source: SourceMeta,
}

impl Document {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: SourceMeta { filename: filename.into(), pages: PageMap::single() },
        }
    }

    #[must_use]
    pub fn with_pages(mut self, pages: PageMap) -> Self {
        self.source.pages = pages;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &SourceMeta {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.source.filename
    }
}

/// Provenance carried by every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub filename: String,
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// A bounded span of a document plus provenance.
///
/// - `text`: overlap prefix followed by the new content
/// - `range`: character range of the new content in `Document::text`
/// - `overlap`: number of leading characters of `text` borrowed from the previous chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub range: Range<usize>,
    pub overlap: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        chunk_id(&self.metadata.document_id, self.metadata.chunk_index)
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The chunk text without the overlap prefix.
    pub fn content(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.text[byte..],
            None if self.overlap == 0 => &self.text,
            None => "",
        }
    }
}

pub fn chunk_id(document_id: &str, chunk_index: usize) -> ChunkId {
    format!("{document_id}:{chunk_index}")
}

/// A chunk together with its embedding, as stored by a vector backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn id(&self) -> ChunkId {
        self.chunk.id()
    }
}

/// Metadata restriction applied before ranking. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub document_id: Option<String>,
    pub filename: Option<String>,
}

impl QueryFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self { document_id: Some(document_id.into()), filename: None }
    }

    pub fn filename(filename: impl Into<String>) -> Self {
        Self { document_id: None, filename: Some(filename.into()) }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.filename.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.document_id.as_deref().map_or(true, |id| metadata.document_id == id)
            && self.filename.as_deref().map_or(true, |name| metadata.filename == name)
    }
}

/// One ranked hit of a query. `distance` is cosine distance; lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub chunk: Chunk,
    pub distance: f32,
}

impl QueryMatch {
    pub fn relevance(&self) -> f32 {
        relevance(self.distance)
    }
}

/// `1 - distance`, clamped to `[0, 1]`.
pub fn relevance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// User-facing pointer from an answer back to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// The `Document N` label used in the prompt, starting at 1.
    pub number: usize,
    pub document_id: String,
    pub filename: String,
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub relevance: f32,
    pub excerpt: String,
}

impl Citation {
    pub fn from_match(number: usize, hit: &QueryMatch, excerpt_chars: usize) -> Self {
        let meta = &hit.chunk.metadata;
        Self {
            number,
            document_id: meta.document_id.clone(),
            filename: meta.filename.clone(),
            page: meta.page,
            chunk_index: meta.chunk_index,
            total_chunks: meta.total_chunks,
            relevance: hit.relevance(),
            excerpt: excerpt(&hit.chunk.text, excerpt_chars),
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerKind {
    /// Produced by the generation backend from retrieved context.
    Generated,
    /// Nothing was retrieved; the fixed insufficient-information answer.
    NoContext,
}

/// Generated text plus citations in retrieval rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub kind: AnswerKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, overlap: usize) -> Chunk {
        Chunk {
            text: text.to_string(),
            range: 0..text.len(),
            overlap,
            metadata: ChunkMetadata {
                document_id: "doc".into(),
                filename: "doc.txt".into(),
                page: Some(1),
                chunk_index: 3,
                total_chunks: 5,
            },
        }
    }

    #[test]
    fn page_lookup_is_one_based() {
        let pages = PageMap::new(vec![0, 10, 25]);
        assert_eq!(pages.page_at(0), Some(1));
        assert_eq!(pages.page_at(9), Some(1));
        assert_eq!(pages.page_at(10), Some(2));
        assert_eq!(pages.page_at(400), Some(3));
        assert_eq!(PageMap::default().page_at(0), None);
    }

    #[test]
    fn relevance_is_clamped() {
        assert_eq!(relevance(0.0), 1.0);
        assert_eq!(relevance(1.5), 0.0);
        assert_eq!(relevance(-0.2), 1.0);
        assert!((relevance(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(relevance(f32::NAN), 0.0);
    }

    #[test]
    fn content_skips_overlap_prefix() {
        let c = chunk("abcdeFGHIJ", 5);
        assert_eq!(c.content(), "FGHIJ");
        assert_eq!(c.id(), "doc:3");
        assert_eq!(chunk("héllo", 0).content(), "héllo");
        assert_eq!(chunk("héllo", 2).content(), "llo");
    }

    #[test]
    fn excerpt_marks_truncation() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("0123456789abc", 10), "0123456789...");
    }

    #[test]
    fn citation_projects_match() {
        let hit = QueryMatch { chunk: chunk("some supporting text", 0), distance: 0.1 };
        let citation = Citation::from_match(2, &hit, 4);
        assert_eq!(citation.number, 2);
        assert_eq!(citation.filename, "doc.txt");
        assert_eq!(citation.chunk_index, 3);
        assert_eq!(citation.excerpt, "some...");
        assert!((citation.relevance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn query_filter_matches_on_set_fields_only() {
        let meta = chunk("x", 0).metadata;
        assert!(QueryFilter::default().matches(&meta));
        assert!(QueryFilter::default().is_empty());
        assert!(QueryFilter::document("doc").matches(&meta));
        assert!(!QueryFilter::document("other").matches(&meta));
        assert!(QueryFilter::filename("doc.txt").matches(&meta));
        let both = QueryFilter { document_id: Some("doc".into()), filename: Some("other.txt".into()) };
        assert!(!both.matches(&meta));
        assert!(!both.is_empty());
    }
}
