//! Hierarchical separator splitting with overlap.
//!
//! Splitting runs over a worklist of `(byte range, separator depth)` pairs:
//! a segment longer than `max_size` is split on the separator at its depth and
//! the parts are queued one level deeper. When the separators run out (or the
//! separator is `""`) the segment is cut every `max_size` characters. Pieces
//! are then trimmed, packed greedily up to `max_size - overlap` characters and
//! prefixed with the tail of the previous chunk.

use std::ops::Range;

use serde::Serialize;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{Chunk, ChunkMetadata, Document};

/// A chunk before document provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    /// Character range of the new content in the input text.
    pub range: Range<usize>,
    /// Leading characters of `text` copied from the previous chunk.
    pub overlap: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Fails with a configuration error when `overlap >= max_size` or `max_size == 0`.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split a document into chunks carrying its provenance.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let parts = self.split(document.text());
        let total_chunks = parts.len();
        let pages = &document.source().pages;
        let chunks: Vec<Chunk> = parts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, part)| Chunk {
                metadata: ChunkMetadata {
                    document_id: document.id().to_string(),
                    filename: document.filename().to_string(),
                    page: pages.page_at(part.range.start),
                    chunk_index,
                    total_chunks,
                },
                text: part.text,
                range: part.range,
                overlap: part.overlap,
            })
            .collect();
        tracing::debug!(document = document.id(), chunks = chunks.len(), "chunked document");
        chunks
    }

    /// Split raw text. Empty or whitespace-only input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let pieces = self.split_pieces(text);
        let spans = self.pack(text, pieces);
        self.attach_overlap(text, spans)
    }

    fn split_pieces(&self, text: &str) -> Vec<Range<usize>> {
        let max_size = self.config.max_size;
        let mut pieces = Vec::new();
        let mut work: Vec<(Range<usize>, usize)> = vec![(0..text.len(), 0)];

        while let Some((range, depth)) = work.pop() {
            let segment = &text[range.clone()];
            if char_len(segment) <= max_size {
                pieces.push(range);
                continue;
            }
            match self.config.separators.get(depth).map(String::as_str) {
                Some(separator) if !separator.is_empty() => {
                    for part in split_keeping_separator(segment, separator).into_iter().rev() {
                        work.push((range.start + part.start..range.start + part.end, depth + 1));
                    }
                }
                _ => {
                    let base = range.start;
                    pieces.extend(hard_cut(segment, max_size).into_iter().map(|r| base + r.start..base + r.end));
                }
            }
        }
        pieces
    }

    fn pack(&self, text: &str, pieces: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let budget = self.config.max_size - self.config.overlap;
        let mut spans = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for piece in pieces.into_iter().filter_map(|p| trim_range(text, p)) {
            current = match current {
                None => Some(piece),
                Some(cur) => {
                    let merged = cur.start..piece.end;
                    if char_len(&text[merged.clone()]) <= budget {
                        Some(merged)
                    } else {
                        spans.push(cur);
                        Some(piece)
                    }
                }
            };
        }
        if let Some(cur) = current {
            spans.push(cur);
        }
        spans
    }

    fn attach_overlap(&self, text: &str, spans: Vec<Range<usize>>) -> Vec<TextChunk> {
        let mut cursor = CharCursor::new(text);
        let mut chunks: Vec<TextChunk> = Vec::with_capacity(spans.len());

        for span in spans {
            let content = &text[span.clone()];
            let content_len = char_len(content);
            let start = cursor.char_offset(span.start);
            let (prefix, overlap) = match chunks.last() {
                Some(prev) => {
                    let room = self.config.max_size.saturating_sub(content_len);
                    tail_chars(&prev.text, self.config.overlap.min(room))
                }
                None => ("", 0),
            };
            let text = format!("{prefix}{content}");
            chunks.push(TextChunk { text, range: start..start + content_len, overlap });
        }
        chunks
    }
}

/// `chunk(text, max_size, overlap, separators)` as a single call.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize, separators: &[&str]) -> Result<Vec<TextChunk>> {
    Ok(Chunker::new(ChunkingConfig::new(max_size, overlap, separators))?.split(text))
}

/// Summary of a chunk set, in characters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub total_characters: usize,
}

impl ChunkStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let sizes: Vec<usize> = chunks.iter().map(Chunk::char_len).collect();
        let (Some(&min), Some(&max)) = (sizes.iter().min(), sizes.iter().max()) else {
            return Self::default();
        };
        let total: usize = sizes.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = total as f64 / sizes.len() as f64;
        Self { total_chunks: sizes.len(), avg_chunk_size: avg, min_chunk_size: min, max_chunk_size: max, total_characters: total }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `separator`, leaving each separator attached to the part before it.
fn split_keeping_separator(segment: &str, separator: &str) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, matched) in segment.match_indices(separator) {
        let end = idx + matched.len();
        parts.push(start..end);
        start = end;
    }
    if start < segment.len() {
        parts.push(start..segment.len());
    }
    parts
}

/// Consecutive windows of `max_chars` characters.
fn hard_cut(segment: &str, max_chars: usize) -> Vec<Range<usize>> {
    let mut cuts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in segment.char_indices() {
        if count == max_chars {
            cuts.push(start..idx);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < segment.len() {
        cuts.push(start..segment.len());
    }
    cuts
}

fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = range.start + (slice.len() - slice.trim_start().len());
    Some(start..start + trimmed.len())
}

/// The last `n` characters of `s` and how many were actually taken.
fn tail_chars(s: &str, n: usize) -> (&str, usize) {
    if n == 0 {
        return ("", 0);
    }
    let len = char_len(s);
    if n >= len {
        return (s, len);
    }
    match s.char_indices().nth(len - n) {
        Some((byte, _)) => (&s[byte..], n),
        None => ("", 0),
    }
}

/// Converts increasing byte offsets into character offsets in one pass.
struct CharCursor<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, byte: 0, chars: 0 }
    }

    fn char_offset(&mut self, byte: usize) -> usize {
        if byte >= self.byte {
            self.chars += char_len(&self.text[self.byte..byte]);
        } else {
            self.chars = char_len(&self.text[..byte]);
        }
        self.byte = byte;
        self.chars
    }
}
