//! Child-chunk search against the vector index.
//!
//! The [`VectorIndex`] trait is the seam to the external index server; the
//! [`ChildRetriever`] issues exactly one search per call with the configured
//! mode and parameters, and returns whatever the index answered.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::Chunk;
use crate::error::{Result, RetrievalError};
use crate::filter::FilterExpression;

/// How the vector index selects chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Plain nearest-neighbour similarity.
    Similarity,
    /// Maximal marginal relevance: relevance traded against diversity.
    #[default]
    Mmr,
}

/// Result-count parameters forwarded to the index verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Chunks to return.
    pub k: usize,
    /// Candidates considered before selection.
    pub fetch_k: usize,
}

/// A similarity-search backend holding child chunks.
///
/// Implementations embed the query, run the search, and return chunks with
/// their metadata. `filter` is a rendered [`FilterExpression`] or `None`.
///
/// # Example
///
/// ```rust,ignore
/// use litrag::{VectorIndex, SearchParams};
///
/// let chunks = index
///     .similarity_search("perovskite stability", SearchParams { k: 10, fetch_k: 30 }, None)
///     .await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return the `k` chunks most similar to `query`.
    async fn similarity_search(
        &self,
        query: &str,
        params: SearchParams,
        filter: Option<&str>,
    ) -> Result<Vec<Chunk>>;

    /// Return `k` chunks chosen by MMR from the `fetch_k` most similar.
    async fn max_marginal_relevance_search(
        &self,
        query: &str,
        params: SearchParams,
        filter: Option<&str>,
    ) -> Result<Vec<Chunk>>;
}

/// Issues single searches against a [`VectorIndex`].
#[derive(Clone)]
pub struct ChildRetriever {
    index: Arc<dyn VectorIndex>,
    mode: SearchMode,
    params: SearchParams,
}

impl ChildRetriever {
    /// Create a retriever over `index`.
    pub fn new(index: Arc<dyn VectorIndex>, mode: SearchMode, params: SearchParams) -> Self {
        Self { index, mode, params }
    }

    /// The configured search mode.
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// The configured search parameters.
    pub fn params(&self) -> SearchParams {
        self.params
    }

    /// Run one search for `query`, restricted by `filter` when it is non-empty.
    ///
    /// Chunks are returned exactly as the index produced them.
    ///
    /// # Errors
    ///
    /// Every index failure surfaces as [`RetrievalError::VectorIndex`].
    pub async fn retrieve(
        &self,
        query: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<Chunk>> {
        let filter = filter.and_then(FilterExpression::as_option);
        debug!(
            query,
            mode = ?self.mode,
            k = self.params.k,
            fetch_k = self.params.fetch_k,
            filter,
            "searching child chunks"
        );

        let result = match self.mode {
            SearchMode::Similarity => {
                self.index.similarity_search(query, self.params, filter).await
            }
            SearchMode::Mmr => {
                self.index.max_marginal_relevance_search(query, self.params, filter).await
            }
        };

        match result {
            Ok(chunks) => {
                debug!(query, chunk_count = chunks.len(), "child search completed");
                Ok(chunks)
            }
            Err(e @ RetrievalError::VectorIndex { .. }) => {
                error!(query, error = %e, "vector index search failed");
                Err(e)
            }
            Err(e) => {
                error!(query, error = %e, "vector index search failed");
                Err(RetrievalError::VectorIndex {
                    backend: "index".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
