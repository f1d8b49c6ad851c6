//! docqa-rag
//!
//! Query-time half of the pipeline: [`Retriever`] shapes index results into a
//! bounded context, [`AnswerComposer`] runs the per-query state machine against
//! a generation backend, and [`Pipeline`] ties ingestion and answering together.

pub mod composer;
pub mod pipeline;
pub mod prompt;
pub mod retriever;

pub use composer::{AnswerComposer, QueryState};
pub use pipeline::{IngestReport, Ingestor, Pipeline};
pub use retriever::{assemble_context, AssembledContext, Retrieval, Retriever};
