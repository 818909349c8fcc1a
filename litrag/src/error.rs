//! Error types for the `litrag` crate.

use thiserror::Error;

use crate::orchestrator::RetrievalStage;

/// Errors that can occur while storing, searching, or reranking documents.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A destructive store operation targeted a table that was never created.
    #[error("Parent store table '{table}' does not exist")]
    StoreNotInitialized {
        /// The missing table.
        table: String,
    },

    /// An error occurred in the parent document store backend.
    #[error("Parent store error ({backend}): {message}")]
    Store {
        /// The store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The cross-encoder scoring backend failed or returned a malformed answer.
    #[error("Scoring backend error ({scorer}): {message}")]
    ScoringBackend {
        /// The scorer that produced the error.
        scorer: String,
        /// A description of the failure.
        message: String,
    },

    /// The query expansion chain failed. Recovered by the expander, never
    /// surfaced from a retrieval call.
    #[error("Query expansion error: {0}")]
    QueryExpansion(String),

    /// A filter constraint set could not be rendered.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The vector index failed to answer a search.
    #[error("Vector index error ({backend}): {message}")]
    VectorIndex {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The self-query model produced no usable structured query.
    #[error("Structured query error: {0}")]
    StructuredQuery(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored document could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A retrieval request failed; `stage` names where.
    #[error("Retrieval failed while {stage}: {source}")]
    Stage {
        /// The stage that was running when the failure happened.
        stage: RetrievalStage,
        /// The originating error.
        #[source]
        source: Box<RetrievalError>,
    },
}

impl RetrievalError {
    /// Wrap an error as the terminal failure of `stage`.
    pub fn at_stage(stage: RetrievalStage, source: RetrievalError) -> Self {
        Self::Stage { stage, source: Box::new(source) }
    }

    /// The stage a terminal failure happened in, if this is one.
    pub fn stage(&self) -> Option<RetrievalStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
