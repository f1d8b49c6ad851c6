//! docqa-core
//!
//! Domain types, error taxonomy, capability traits, configuration and the
//! chunker shared by every other crate in the workspace.

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use chunker::{chunk_text, ChunkStats, Chunker, TextChunk};
pub use error::{Error, GenerationError, IndexError, Result};
pub use types::{Answer, AnswerKind, Chunk, ChunkId, ChunkMetadata, Citation, Document, IndexEntry, PageMap, QueryFilter, QueryMatch};
