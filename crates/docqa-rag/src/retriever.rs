//! Query-time retrieval and context assembly.

use std::sync::Arc;

use docqa_core::config::RetrievalConfig;
use docqa_core::types::{QueryFilter, QueryMatch};
use docqa_core::Result;
use docqa_vector::VectorIndex;

use crate::prompt::{context_item, label, ITEM_SEPARATOR};

/// Outcome of a retrieval. `Empty` is a normal result, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Empty,
    Found(Vec<QueryMatch>),
}

impl Retrieval {
    pub fn matches(&self) -> &[QueryMatch] {
        match self {
            Self::Empty => &[],
            Self::Found(m) => m,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// The labeled context block plus the matches it contains, in label order.
///
/// `used` holds the matches exactly as retrieved; only `text` reflects any
/// truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub used: Vec<QueryMatch>,
    /// Matches dropped to stay within the budget.
    pub dropped: usize,
    /// Characters of `used[0]` that made it into `text`, when it had to be cut.
    pub truncated_to: Option<usize>,
}

pub struct Retriever {
    index: Arc<VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top matches for `query` passing `filter`; `top_k` falls back to the
    /// configured default.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>, filter: &QueryFilter) -> Result<Retrieval> {
        if query.trim().is_empty() {
            return Ok(Retrieval::Empty);
        }
        let k = top_k.unwrap_or(self.config.top_k);
        let matches = self.index.query_filtered(query, k, filter).await?;
        tracing::debug!(top_k = k, filter = ?filter, hits = matches.len(), "retrieved");
        if matches.is_empty() {
            Ok(Retrieval::Empty)
        } else {
            Ok(Retrieval::Found(matches))
        }
    }

    pub fn assemble(&self, matches: &[QueryMatch]) -> AssembledContext {
        assemble_context(matches, self.config.max_context_chars)
    }
}

/// Build the `[Document N]` context block within `budget` characters.
///
/// Whole chunks are kept in rank order until the next one would overflow;
/// it and everything ranked below it are dropped. When even the first chunk
/// does not fit, its text is cut to the room left after its label. A budget
/// with no room for a single character of chunk text yields no context.
pub fn assemble_context(matches: &[QueryMatch], budget: usize) -> AssembledContext {
    let mut text = String::new();
    let mut used_chars = 0usize;
    let mut used = Vec::new();
    let mut truncated_to = None;
    for (i, hit) in matches.iter().enumerate() {
        let item = context_item(i + 1, &hit.chunk.text);
        let sep = if i == 0 { 0 } else { ITEM_SEPARATOR.len() };
        let item_chars = item.chars().count();
        if used_chars + sep + item_chars > budget {
            let room = budget.saturating_sub(label(1).chars().count() + 1);
            if i == 0 && room > 0 {
                let cut: String = hit.chunk.text.chars().take(room).collect();
                text = context_item(1, &cut);
                truncated_to = Some(room);
                used.push(hit.clone());
            }
            break;
        }
        if sep > 0 {
            text.push_str(ITEM_SEPARATOR);
        }
        text.push_str(&item);
        used_chars += sep + item_chars;
        used.push(hit.clone());
    }
    let dropped = matches.len() - used.len();
    if dropped > 0 || truncated_to.is_some() {
        tracing::debug!(budget, kept = used.len(), dropped, truncated = truncated_to.is_some(), "context budget reached");
    }
    AssembledContext { text, used, dropped, truncated_to }
}
