//! # litrag
//!
//! Parent-document retrieval over a scientific-literature knowledge base.
//!
//! ## Overview
//!
//! Small child chunks are searched in a vector index; each hit is mapped back
//! to the full parent document it was cut from, and the parents are reranked
//! by a cross-encoder before being returned. The pieces are:
//!
//! - [`ParentStore`] - persistent key/value store of parent documents
//!   ([`InMemoryParentStore`], [`SqliteParentStore`])
//! - [`build_filter_expression`] - metadata constraints to filter strings
//! - [`ChildRetriever`] - similarity or MMR search over a [`VectorIndex`]
//! - [`QueryExpander`] - multi-query expansion that never fails a request
//! - [`Reranker`] - batched cross-encoder scoring through a [`Scorer`]
//! - [`RetrievalOrchestrator`] - runs the [`RetrievalStrategy`] state machine
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use litrag::{InMemoryParentStore, RetrievalOrchestrator, RetrievalStrategy};
//!
//! let orchestrator = RetrievalOrchestrator::builder()
//!     .parent_store(Arc::new(InMemoryParentStore::default()))
//!     .vector_index(index)
//!     .scorer(scorer)
//!     .build()?;
//!
//! let outcome = orchestrator.retrieve("perovskite stability", &RetrievalStrategy::Plain).await?;
//! for result in outcome.results {
//!     println!("{:.3} {}", result.score, result.document.id);
//! }
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default) - [`SqliteParentStore`] on `sqlx`
//! - `openai` - [`openai::OpenAiChatModel`] for expansion and self-query
//! - `tei` - [`tei::TeiScorer`] for a `/rerank` cross-encoder endpoint

pub mod config;
pub mod dedup;
pub mod document;
pub mod error;
pub mod expander;
pub mod filter;
#[cfg(feature = "openai")]
pub mod openai;
pub mod orchestrator;
pub mod reranker;
pub mod retriever;
pub mod selfquery;
pub mod store;
#[cfg(feature = "tei")]
pub mod tei;

pub use config::RetrievalConfig;
pub use dedup::{ParentReferences, dedup_chunks};
pub use document::{Chunk, Metadata, ParentDocument, QueryVariant, ScoredResult};
pub use error::{Result, RetrievalError};
pub use expander::{LanguageModel, LlmExpansionChain, QueryExpander, QueryExpansionChain};
pub use filter::{FieldConstraint, FieldValue, FilterExpression, build_filter_expression};
pub use orchestrator::{
    RetrievalOrchestrator, RetrievalOrchestratorBuilder, RetrievalOutcome, RetrievalStage,
    RetrievalStrategy,
};
pub use reranker::{Reranker, Scorer};
pub use retriever::{ChildRetriever, SearchMode, SearchParams, VectorIndex};
pub use selfquery::{AttributeInfo, SelfQueryParser, StructuredQuery};
#[cfg(feature = "sqlite")]
pub use store::SqliteParentStore;
pub use store::{InMemoryParentStore, ParentStore};
