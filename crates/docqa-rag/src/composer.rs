//! Per-query answer state machine.
//!
//! ```text
//! QueryReceived -> Retrieve -> Empty    -> RespondNoContext
//!                           -> NonEmpty -> ComposePrompt -> Generate -> Respond
//! ```
//!
//! Nothing is locked across the generation call; retrieval reads the last
//! committed index state, so dropping the future before `Generate` needs no
//! cleanup.

use std::sync::Arc;
use std::time::Duration;

use docqa_core::config::GenerationConfig;
use docqa_core::traits::{GenerationRequest, Generator};
use docqa_core::types::{Answer, AnswerKind, Citation, QueryFilter, QueryMatch};
use docqa_core::{Error, GenerationError, Result};

use crate::prompt::{NO_CONTEXT_ANSWER, SYSTEM_INSTRUCTION};
use crate::retriever::{Retrieval, Retriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    QueryReceived,
    Retrieve,
    RespondNoContext,
    ComposePrompt,
    Generate,
    Respond,
}

pub struct AnswerComposer {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    timeout: Duration,
    max_retries: u32,
    excerpt_chars: usize,
}

impl AnswerComposer {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>, config: &GenerationConfig) -> Self {
        Self {
            retriever,
            generator,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries.min(1),
            excerpt_chars: config.excerpt_chars,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn excerpt_chars(&self) -> usize {
        self.excerpt_chars
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.answer_with(question, None).await
    }

    /// Answer with a `top_k` overriding the configured default.
    pub async fn answer_with(&self, question: &str, top_k: Option<usize>) -> Result<Answer> {
        self.answer_filtered(question, top_k, &QueryFilter::default()).await
    }

    /// Run the state machine for one question, retrieving only chunks that
    /// pass `filter`.
    pub async fn answer_filtered(&self, question: &str, top_k: Option<usize>, filter: &QueryFilter) -> Result<Answer> {
        let mut state = QueryState::QueryReceived;
        transition(&mut state, QueryState::Retrieve);
        let matches = match self.retriever.retrieve(question, top_k, filter).await? {
            Retrieval::Empty => {
                transition(&mut state, QueryState::RespondNoContext);
                return Ok(no_context_answer());
            }
            Retrieval::Found(matches) => matches,
        };

        transition(&mut state, QueryState::ComposePrompt);
        let context = self.retriever.assemble(&matches);
        if context.used.is_empty() {
            transition(&mut state, QueryState::RespondNoContext);
            return Ok(no_context_answer());
        }
        let request = GenerationRequest {
            system: SYSTEM_INSTRUCTION.to_string(),
            context: context.text,
            question: question.trim().to_string(),
        };

        transition(&mut state, QueryState::Generate);
        let text = match self.generate(&request).await {
            Ok(text) => text,
            Err(source) => {
                tracing::error!(error = %source, retrieved = context.used.len(), "generation failed");
                return Err(Error::Generation { source, retrieved: context.used });
            }
        };

        transition(&mut state, QueryState::Respond);
        let citations = citations(&context.used, self.excerpt_chars);
        tracing::info!(citations = citations.len(), generator = self.generator.name(), "answered question");
        Ok(Answer { text, citations, kind: AnswerKind::Generated })
    }

    /// One attempt plus at most one retry on a transient failure.
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.generator.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(self.timeout)),
            };
            let err = match outcome {
                Ok(response) if response.text.trim().is_empty() => {
                    GenerationError::Malformed("generation backend returned empty text".into())
                }
                Ok(response) => return Ok(response.text),
                Err(err) => err,
            };
            if attempt >= self.max_retries || !err.is_transient() {
                return Err(err);
            }
            attempt += 1;
            tracing::warn!(error = %err, attempt, "transient generation failure, retrying");
        }
    }
}

fn transition(state: &mut QueryState, next: QueryState) {
    tracing::debug!(from = ?state, to = ?next, "query state");
    *state = next;
}

pub fn no_context_answer() -> Answer {
    Answer { text: NO_CONTEXT_ANSWER.to_string(), citations: Vec::new(), kind: AnswerKind::NoContext }
}

/// Citations numbered to match the `[Document N]` labels.
pub fn citations(used: &[QueryMatch], excerpt_chars: usize) -> Vec<Citation> {
    used.iter().enumerate().map(|(i, hit)| Citation::from_match(i + 1, hit, excerpt_chars)).collect()
}
