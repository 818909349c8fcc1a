//! Configuration for the retrieval orchestrator.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};
use crate::retriever::SearchMode;

/// Configuration parameters for a [`RetrievalOrchestrator`](crate::RetrievalOrchestrator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Similarity or MMR search against the vector index.
    pub search_mode: SearchMode,
    /// Number of chunks each search returns.
    pub k: usize,
    /// Number of candidates the index considers before MMR selection.
    pub fetch_k: usize,
    /// Number of parent documents returned after reranking.
    pub top_k: usize,
    /// Candidates per scoring backend call.
    pub rerank_batch_size: usize,
    /// Scoring batches in flight at once. `1` issues them sequentially.
    pub rerank_concurrency: usize,
    /// Alternative phrasings requested from the expansion chain.
    pub max_alternatives: usize,
    /// Upper bound on concurrent vector index searches per request.
    pub search_concurrency: usize,
    /// Render `title` constraints as a `like` predicate.
    pub fuzzy_title: bool,
    /// Chunk metadata field listing the documents a chunk cites.
    pub reference_field: String,
    /// Metadata field the cited identifiers are matched against on the second hop.
    pub reference_target_field: String,
    /// Run query expansion for multi-query strategies.
    pub expand_queries: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_mode: SearchMode::Mmr,
            k: 10,
            fetch_k: 30,
            top_k: 5,
            rerank_batch_size: 10,
            rerank_concurrency: 1,
            max_alternatives: 3,
            search_concurrency: 4,
            fuzzy_title: false,
            reference_field: "references".to_string(),
            reference_target_field: "doi".to_string(),
            expand_queries: true,
        }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if:
    /// - `k`, `top_k`, `rerank_batch_size`, `rerank_concurrency` or `search_concurrency` is zero
    /// - `fetch_k < k`
    /// - either reference field name is empty
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("k", self.k),
            ("top_k", self.top_k),
            ("rerank_batch_size", self.rerank_batch_size),
            ("rerank_concurrency", self.rerank_concurrency),
            ("search_concurrency", self.search_concurrency),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(RetrievalError::Config(format!("{name} must be greater than zero")));
        }
        if self.fetch_k < self.k {
            return Err(RetrievalError::Config(format!(
                "fetch_k ({}) must be at least k ({})",
                self.fetch_k, self.k
            )));
        }
        if self.reference_field.trim().is_empty() || self.reference_target_field.trim().is_empty() {
            return Err(RetrievalError::Config(
                "reference field names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Set the vector index search mode.
    pub fn search_mode(mut self, mode: SearchMode) -> Self {
        self.config.search_mode = mode;
        self
    }

    /// Set the number of chunks per search.
    pub fn k(mut self, k: usize) -> Self {
        self.config.k = k;
        self
    }

    /// Set the MMR candidate pool size.
    pub fn fetch_k(mut self, fetch_k: usize) -> Self {
        self.config.fetch_k = fetch_k;
        self
    }

    /// Set the number of reranked documents to return.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    /// Set the number of candidates per scoring call.
    pub fn rerank_batch_size(mut self, size: usize) -> Self {
        self.config.rerank_batch_size = size;
        self
    }

    /// Set how many scoring batches may be in flight at once.
    pub fn rerank_concurrency(mut self, concurrency: usize) -> Self {
        self.config.rerank_concurrency = concurrency;
        self
    }

    /// Set how many alternative phrasings to request.
    pub fn max_alternatives(mut self, n: usize) -> Self {
        self.config.max_alternatives = n;
        self
    }

    /// Set the cap on concurrent vector index searches.
    pub fn search_concurrency(mut self, concurrency: usize) -> Self {
        self.config.search_concurrency = concurrency;
        self
    }

    /// Render title constraints with `like`.
    pub fn fuzzy_title(mut self, fuzzy: bool) -> Self {
        self.config.fuzzy_title = fuzzy;
        self
    }

    /// Set the metadata field that lists cited documents.
    pub fn reference_field(mut self, field: impl Into<String>) -> Self {
        self.config.reference_field = field.into();
        self
    }

    /// Set the metadata field cited identifiers are matched against.
    pub fn reference_target_field(mut self, field: impl Into<String>) -> Self {
        self.config.reference_target_field = field.into();
        self
    }

    /// Enable or disable query expansion.
    pub fn expand_queries(mut self, expand: bool) -> Self {
        self.config.expand_queries = expand;
        self
    }

    /// Build the [`RetrievalConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RetrievalConfig::validate`].
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
