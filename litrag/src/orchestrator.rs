//! Retrieval orchestrator.
//!
//! The [`RetrievalOrchestrator`] runs one request through
//!
//! ```text
//! QueryReceived -> [Expanding] -> Searching -> ResolvingParents -> Reranking -> Done
//! ```
//!
//! and stops at `Failed` with the originating error on any stage failure.
//! Only query expansion recovers locally; everything else is fatal to the
//! request and nothing partial is returned.
//!
//! All collaborators are injected through [`RetrievalOrchestrator::builder()`].
//! Dropping the future returned by [`retrieve`](RetrievalOrchestrator::retrieve)
//! abandons every in-flight search and scoring call.
//!
//! # Example
//!
//! ```rust,ignore
//! use litrag::{RetrievalOrchestrator, RetrievalConfig, RetrievalStrategy};
//!
//! let orchestrator = RetrievalOrchestrator::builder()
//!     .config(RetrievalConfig::default())
//!     .parent_store(Arc::new(store))
//!     .vector_index(Arc::new(index))
//!     .scorer(Arc::new(scorer))
//!     .expansion_model(Arc::new(llm))
//!     .build()?;
//!
//! let outcome = orchestrator.retrieve("perovskite stability", &RetrievalStrategy::Plain).await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::RetrievalConfig;
use crate::dedup::{ParentReferences, dedup_chunks};
use crate::document::{Chunk, ParentDocument, QueryVariant, ScoredResult};
use crate::error::{Result, RetrievalError};
use crate::expander::{LanguageModel, LlmExpansionChain, QueryExpander, QueryExpansionChain};
use crate::filter::{FieldConstraint, FieldValue, FilterExpression, build_filter_expression};
use crate::reranker::{Reranker, Scorer};
use crate::retriever::{ChildRetriever, SearchParams, VectorIndex};
use crate::selfquery::SelfQueryParser;
use crate::store::ParentStore;

/// States of a single retrieval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStage {
    /// The query arrived; filters and structured queries are prepared here.
    QueryReceived,
    /// Alternative phrasings are being generated.
    Expanding,
    /// The vector index is being searched.
    Searching,
    /// Child chunks are being mapped to parent documents.
    ResolvingParents,
    /// Parent documents are being scored.
    Reranking,
    /// The request completed.
    Done,
    /// The request failed.
    Failed,
}

impl fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::QueryReceived => "preparing the query",
            Self::Expanding => "expanding the query",
            Self::Searching => "searching the vector index",
            Self::ResolvingParents => "resolving parent documents",
            Self::Reranking => "reranking",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// How a request searches the index before the shared resolve and rerank stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Multi-query expansion, unfiltered search.
    Plain,
    /// Multi-query expansion with one filter applied to every search.
    Filtered {
        /// Constraints rendered into the filter, in order.
        constraints: Vec<FieldConstraint>,
    },
    /// Constraints and search text derived from the query by a model, then
    /// searched like [`Filtered`](Self::Filtered).
    SelfQuery,
    /// One search, then a second hop restricted to the documents the first
    /// hop's chunks reference.
    ReferenceGraph,
}

impl RetrievalStrategy {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Filtered { .. } => "filtered",
            Self::SelfQuery => "self_query",
            Self::ReferenceGraph => "reference_graph",
        }
    }

    /// Whether the strategy fans out over expanded query variants.
    pub fn is_multi_query(&self) -> bool {
        !matches!(self, Self::ReferenceGraph)
    }
}

/// The result of a successful retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked parent documents, best first.
    pub results: Vec<ScoredResult>,
    /// The query variants that were searched, in issue order.
    pub variants: Vec<QueryVariant>,
    /// The filter applied to searches, if any.
    pub filter: Option<FilterExpression>,
    /// The stages the request passed through.
    pub trace: Vec<RetrievalStage>,
}

/// Tracks the stage of one request.
struct RetrievalRun {
    strategy: &'static str,
    trace: Vec<RetrievalStage>,
}

impl RetrievalRun {
    fn start(query: &str, strategy: &RetrievalStrategy) -> Self {
        debug!(query, strategy = strategy.name(), "retrieval started");
        Self { strategy: strategy.name(), trace: vec![RetrievalStage::QueryReceived] }
    }

    fn enter(&mut self, stage: RetrievalStage) {
        debug!(strategy = self.strategy, %stage, "entering stage");
        self.trace.push(stage);
    }

    fn current(&self) -> RetrievalStage {
        self.trace.last().copied().unwrap_or(RetrievalStage::QueryReceived)
    }

    fn fail(mut self, source: RetrievalError) -> RetrievalError {
        let stage = self.current();
        error!(strategy = self.strategy, %stage, error = %source, "retrieval failed");
        self.trace.push(RetrievalStage::Failed);
        RetrievalError::at_stage(stage, source)
    }
}

/// Composes the parent store, vector index, expander and reranker into
/// retrieval strategies. Construct one via [`RetrievalOrchestrator::builder()`].
pub struct RetrievalOrchestrator {
    config: RetrievalConfig,
    store: Arc<dyn ParentStore>,
    retriever: ChildRetriever,
    reranker: Reranker,
    expander: Option<QueryExpander>,
    self_query: Option<SelfQueryParser>,
}

impl RetrievalOrchestrator {
    /// Create a new [`RetrievalOrchestratorBuilder`].
    pub fn builder() -> RetrievalOrchestratorBuilder {
        RetrievalOrchestratorBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Return a reference to the parent store.
    pub fn parent_store(&self) -> &Arc<dyn ParentStore> {
        &self.store
    }

    /// Run `query` through `strategy` and return the top parent documents.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Stage`] naming the failing stage and carrying
    /// the originating error. Expansion failures are not errors.
    pub async fn retrieve(
        &self,
        query: &str,
        strategy: &RetrievalStrategy,
    ) -> Result<RetrievalOutcome> {
        let mut run = RetrievalRun::start(query, strategy);
        match self.execute(&mut run, query, strategy).await {
            Ok((results, variants, filter)) => {
                run.enter(RetrievalStage::Done);
                info!(
                    strategy = strategy.name(),
                    result_count = results.len(),
                    "retrieval completed"
                );
                Ok(RetrievalOutcome { results, variants, filter, trace: run.trace })
            }
            Err(e) => Err(run.fail(e)),
        }
    }

    async fn execute(
        &self,
        run: &mut RetrievalRun,
        query: &str,
        strategy: &RetrievalStrategy,
    ) -> Result<(Vec<ScoredResult>, Vec<QueryVariant>, Option<FilterExpression>)> {
        let (search_text, filter) = self.prepare(query, strategy).await?;

        let variants = match &self.expander {
            Some(expander) if strategy.is_multi_query() && self.config.expand_queries => {
                run.enter(RetrievalStage::Expanding);
                expander.expand(&search_text).await
            }
            _ => vec![QueryVariant::original(search_text)],
        };

        run.enter(RetrievalStage::Searching);
        let (chunks, filter) = match strategy {
            RetrievalStrategy::ReferenceGraph => {
                self.search_reference_graph(&variants[0].text).await?
            }
            _ => {
                let chunks = self.search_variants(&variants, filter.as_ref()).await?;
                (chunks, filter)
            }
        };

        run.enter(RetrievalStage::ResolvingParents);
        let candidates = self.resolve_parents(chunks).await?;

        run.enter(RetrievalStage::Reranking);
        let results = self.reranker.rerank(query, candidates, self.config.top_k).await?;

        Ok((results, variants, filter))
    }

    /// Derive the search text and the filter applied to every search.
    async fn prepare(
        &self,
        query: &str,
        strategy: &RetrievalStrategy,
    ) -> Result<(String, Option<FilterExpression>)> {
        match strategy {
            RetrievalStrategy::Plain | RetrievalStrategy::ReferenceGraph => {
                Ok((query.to_string(), None))
            }
            RetrievalStrategy::Filtered { constraints } => {
                Ok((query.to_string(), self.build_filter(constraints)?))
            }
            RetrievalStrategy::SelfQuery => {
                let parser = self.self_query.as_ref().ok_or_else(|| {
                    RetrievalError::Config(
                        "self-query strategy requires a self-query model".to_string(),
                    )
                })?;
                let structured = parser.parse(query).await?;
                let filter = self.build_filter(&structured.constraints)?;
                Ok((structured.query, filter))
            }
        }
    }

    fn build_filter(&self, constraints: &[FieldConstraint]) -> Result<Option<FilterExpression>> {
        let filter = build_filter_expression(constraints, self.config.fuzzy_title)?;
        debug!(filter = %filter, "built filter expression");
        Ok((!filter.is_empty()).then_some(filter))
    }

    /// Search every variant concurrently and concatenate results in variant order.
    async fn search_variants(
        &self,
        variants: &[QueryVariant],
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<Chunk>> {
        let workers = variants.len().clamp(1, self.config.search_concurrency);
        let searches: Vec<_> =
            variants.iter().map(|variant| self.retriever.retrieve(&variant.text, filter)).collect();
        let per_variant: Vec<Vec<Chunk>> =
            stream::iter(searches).buffered(workers).try_collect().await?;
        Ok(per_variant.into_iter().flatten().collect())
    }

    /// Search once, then again restricted to the documents the hits cite.
    async fn search_reference_graph(
        &self,
        query: &str,
    ) -> Result<(Vec<Chunk>, Option<FilterExpression>)> {
        let mut chunks = self.retriever.retrieve(query, None).await?;
        let references = collect_references(&chunks, &self.config.reference_field);
        if references.is_empty() {
            debug!(query, "first hop cites nothing, skipping second hop");
            return Ok((chunks, None));
        }

        let constraint = FieldConstraint::new(
            self.config.reference_target_field.clone(),
            FieldValue::List(references.into_iter().map(FieldValue::Text).collect()),
        );
        let filter = build_filter_expression(&[constraint], false)?;
        let second_hop = self.retriever.retrieve(query, Some(&filter)).await?;
        debug!(
            query,
            first_hop = chunks.len(),
            second_hop = second_hop.len(),
            "reference graph searched"
        );
        chunks.extend(second_hop);
        Ok((chunks, Some(filter)))
    }

    /// Deduplicate chunks, fetch their parents, and attach referencing sentences.
    ///
    /// Parents the store does not know are dropped with a warning.
    async fn resolve_parents(&self, chunks: Vec<Chunk>) -> Result<Vec<ParentDocument>> {
        let chunks = dedup_chunks(chunks);
        let references = ParentReferences::from_chunks(&chunks);
        let ids: Vec<&str> = references.parent_ids().collect();
        let documents = self.store.get_many(&ids).await?;

        let mut candidates = Vec::with_capacity(documents.len());
        for (id, document) in ids.iter().zip(documents) {
            match document {
                Some(mut document) => {
                    document.referencing_sentences = references.sentences(id).to_vec();
                    candidates.push(document);
                }
                None => warn!(
                    parent_id = id,
                    table = self.store.table_name(),
                    "parent document not found"
                ),
            }
        }
        debug!(
            chunk_count = chunks.len(),
            parent_count = candidates.len(),
            "resolved parent documents"
        );
        Ok(candidates)
    }
}

/// Identifiers listed under `field` across `chunks`, first-seen order, deduplicated.
///
/// A string value is one identifier; DOIs may legally contain `,` and `;`.
fn collect_references(chunks: &[Chunk], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut references = Vec::new();
    let mut push = |raw: &str| {
        let id = raw.trim();
        if !id.is_empty() && seen.insert(id.to_string()) {
            references.push(id.to_string());
        }
    };

    for chunk in chunks {
        match chunk.metadata.get(field) {
            Some(Value::String(s)) => push(s),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(s) => push(s),
                        Value::Number(n) => push(&n.to_string()),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    references
}

/// Builder for constructing a [`RetrievalOrchestrator`].
///
/// The parent store, vector index, and scorer are required; expansion and
/// self-query models are optional.
#[derive(Default)]
pub struct RetrievalOrchestratorBuilder {
    config: Option<RetrievalConfig>,
    store: Option<Arc<dyn ParentStore>>,
    index: Option<Arc<dyn VectorIndex>>,
    scorer: Option<Arc<dyn Scorer>>,
    expansion_chain: Option<Arc<dyn QueryExpansionChain>>,
    expansion_model: Option<Arc<dyn LanguageModel>>,
    self_query: Option<SelfQueryParser>,
}

impl RetrievalOrchestratorBuilder {
    /// Set the configuration. Defaults to [`RetrievalConfig::default()`].
    pub fn config(mut self, config: RetrievalConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the parent document store.
    pub fn parent_store(mut self, store: Arc<dyn ParentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the vector index holding child chunks.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the reranking scorer.
    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Set a custom query expansion chain.
    pub fn expansion_chain(mut self, chain: Arc<dyn QueryExpansionChain>) -> Self {
        self.expansion_chain = Some(chain);
        self
    }

    /// Expand queries by prompting `model` with the default template.
    pub fn expansion_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.expansion_model = Some(model);
        self
    }

    /// Enable the self-query strategy with `model` and the default fields.
    pub fn self_query_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.self_query = Some(SelfQueryParser::new(model));
        self
    }

    /// Enable the self-query strategy with a configured parser.
    pub fn self_query_parser(mut self, parser: SelfQueryParser) -> Self {
        self.self_query = Some(parser);
        self
    }

    /// Build the [`RetrievalOrchestrator`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if a required collaborator is missing
    /// or the configuration is invalid.
    pub fn build(self) -> Result<RetrievalOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| RetrievalError::Config("parent_store is required".to_string()))?;
        let index = self
            .index
            .ok_or_else(|| RetrievalError::Config("vector_index is required".to_string()))?;
        let scorer =
            self.scorer.ok_or_else(|| RetrievalError::Config("scorer is required".to_string()))?;

        let chain: Option<Arc<dyn QueryExpansionChain>> =
            match (self.expansion_chain, self.expansion_model) {
                (Some(chain), _) => Some(chain),
                (None, Some(model)) => Some(Arc::new(
                    LlmExpansionChain::new(model).with_max_alternatives(config.max_alternatives),
                )),
                (None, None) => None,
            };
        let expander = chain
            .map(|chain| QueryExpander::new(chain).with_max_alternatives(config.max_alternatives));

        let retriever = ChildRetriever::new(
            index,
            config.search_mode,
            SearchParams { k: config.k, fetch_k: config.fetch_k },
        );
        let reranker = Reranker::new(scorer)
            .with_batch_size(config.rerank_batch_size)
            .with_concurrency(config.rerank_concurrency);

        Ok(RetrievalOrchestrator {
            config,
            store,
            retriever,
            reranker,
            expander,
            self_query: self.self_query,
        })
    }
}
