//! Batched cross-encoder reranking of parent documents.
//!
//! The [`Scorer`] trait is the seam to the external scoring backend. The
//! [`Reranker`] splits candidates into batches, collects every score, and only
//! then sorts, so the ranking never depends on which batch answered first.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info};

use crate::document::{ParentDocument, ScoredResult};
use crate::error::{Result, RetrievalError};

/// Candidates per scoring call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A relevance scoring backend, typically a cross-encoder.
///
/// `pairs` holds `(query, candidate_text)` tuples; the answer must hold one
/// score per pair, in order.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Short backend name used in errors and logs.
    fn name(&self) -> &str {
        "scorer"
    }

    /// Score every pair against `query`.
    async fn score(&self, query: &str, pairs: &[(&str, &str)]) -> Result<Vec<f32>>;
}

/// Split `len` candidates into batches of `batch_size`.
///
/// A trailing remainder shorter than `batch_size` is merged into the last
/// full batch instead of being sent on its own: 23 candidates in batches of
/// 10 give `[0..10, 10..23]`. Fewer than `batch_size` candidates form one batch.
pub fn plan_batches(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    if len == 0 {
        return Vec::new();
    }
    let full = (len / batch_size).max(1);
    let mut batches: Vec<Range<usize>> =
        (0..full).map(|i| i * batch_size..(i + 1) * batch_size).collect();
    if let Some(last) = batches.last_mut() {
        last.end = len;
    }
    batches
}

/// Reranks parent documents with a [`Scorer`].
///
/// # Example
///
/// ```rust,ignore
/// use litrag::Reranker;
///
/// let reranker = Reranker::new(Arc::new(my_scorer)).with_batch_size(10);
/// let ranked = reranker.rerank("graphene conductivity", documents, 5).await?;
/// ```
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn Scorer>,
    batch_size: usize,
    concurrency: usize,
}

impl Reranker {
    /// Create a reranker issuing batches of [`DEFAULT_BATCH_SIZE`] sequentially.
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer, batch_size: DEFAULT_BATCH_SIZE, concurrency: 1 }
    }

    /// Set the number of candidates per scoring call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Allow up to `concurrency` scoring calls in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Score `candidates` against `query` and return the best `top_k`.
    ///
    /// Candidates equal on `(id, text)` are scored once. Results are sorted by
    /// descending score; ties keep their input order. Each result carries the
    /// document's referencing sentences.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::ScoringBackend`] if any batch fails or returns
    /// the wrong number of scores. No partial ranking is produced.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ParentDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        let candidates = unique_candidates(candidates);
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let batches = plan_batches(candidates.len(), self.batch_size);
        let batch_count = batches.len();
        let scores: Vec<f32> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, range)| self.score_batch(query, &candidates, index, range))
            .buffered(self.concurrency)
            .try_collect::<Vec<Vec<f32>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| sort_key(scores[b]).total_cmp(&sort_key(scores[a])));

        let mut slots: Vec<Option<ParentDocument>> = candidates.into_iter().map(Some).collect();
        let results: Vec<ScoredResult> = order
            .into_iter()
            .take(top_k)
            .enumerate()
            .filter_map(|(rank, index)| {
                let document = slots[index].take()?;
                Some(ScoredResult {
                    referencing_sentences: document.referencing_sentences.clone(),
                    document,
                    score: scores[index],
                    rank,
                })
            })
            .collect();

        info!(
            scorer = self.scorer.name(),
            batches = batch_count,
            returned = results.len(),
            "rerank completed"
        );
        Ok(results)
    }

    async fn score_batch(
        &self,
        query: &str,
        candidates: &[ParentDocument],
        index: usize,
        range: Range<usize>,
    ) -> Result<Vec<f32>> {
        let expected = range.len();
        let pairs: Vec<(&str, &str)> =
            candidates[range].iter().map(|doc| (query, doc.text.as_str())).collect();

        debug!(scorer = self.scorer.name(), batch = index, size = expected, "scoring batch");
        let scores = self.scorer.score(query, &pairs).await.map_err(|e| {
            error!(scorer = self.scorer.name(), batch = index, error = %e, "scoring batch failed");
            match e {
                e @ RetrievalError::ScoringBackend { .. } => e,
                other => RetrievalError::ScoringBackend {
                    scorer: self.scorer.name().to_string(),
                    message: other.to_string(),
                },
            }
        })?;

        if scores.len() != expected {
            error!(
                scorer = self.scorer.name(),
                batch = index,
                expected,
                got = scores.len(),
                "score count mismatch"
            );
            return Err(RetrievalError::ScoringBackend {
                scorer: self.scorer.name().to_string(),
                message: format!("batch {index}: expected {expected} scores, got {}", scores.len()),
            });
        }
        Ok(scores)
    }
}

/// NaN sorts last; `-0.0` ties with `0.0`.
fn sort_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score + 0.0 }
}

fn unique_candidates(candidates: Vec<ParentDocument>) -> Vec<ParentDocument> {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(candidates.len());
    candidates.into_iter().filter(|doc| seen.insert((doc.id.clone(), doc.text.clone()))).collect()
}
