//! Cross-encoder scorer for a text-embeddings-inference style `/rerank` endpoint.
//!
//! This module is only available when the `tei` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, RetrievalError};
use crate::reranker::Scorer;

const SCORER: &str = "tei";

/// A [`Scorer`] calling `POST {base_url}/rerank`.
///
/// The endpoint answers `[{"index": i, "score": s}, ...]` sorted by score;
/// scores are put back in request order before returning.
///
/// # Example
///
/// ```rust,ignore
/// use litrag::tei::TeiScorer;
///
/// let scorer = TeiScorer::new("http://localhost:8080");
/// let reranker = Reranker::new(Arc::new(scorer));
/// ```
#[derive(Debug, Clone)]
pub struct TeiScorer {
    client: reqwest::Client,
    base_url: String,
    raw_scores: bool,
}

impl TeiScorer {
    /// Create a scorer for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            raw_scores: false,
        }
    }

    /// Use an existing HTTP client (for shared connection pools or timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Return raw logits instead of sigmoid-normalized scores.
    pub fn with_raw_scores(mut self, raw: bool) -> Self {
        self.raw_scores = raw;
        self
    }

    fn failure(message: String) -> RetrievalError {
        RetrievalError::ScoringBackend { scorer: SCORER.into(), message }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    raw_scores: bool,
    truncate: bool,
}

#[derive(Deserialize)]
struct RankedText {
    index: usize,
    score: f32,
}

/// Put `ranked` scores back into request order.
fn align_scores(ranked: Vec<RankedText>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for RankedText { index, score } in ranked {
        let slot = scores
            .get_mut(index)
            .ok_or_else(|| TeiScorer::failure(format!("index {index} out of range")))?;
        *slot = Some(score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| TeiScorer::failure(format!("no score for text {i}"))))
        .collect()
}

#[async_trait]
impl Scorer for TeiScorer {
    fn name(&self) -> &str {
        SCORER
    }

    async fn score(&self, query: &str, pairs: &[(&str, &str)]) -> Result<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(scorer = SCORER, batch_size = pairs.len(), "rerank request");

        let request_body = RerankRequest {
            query,
            texts: pairs.iter().map(|(_, text)| *text).collect(),
            raw_scores: self.raw_scores,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(scorer = SCORER, error = %e, "request failed");
                Self::failure(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(scorer = SCORER, %status, "rerank endpoint error");
            return Err(Self::failure(format!("endpoint returned {status}: {body}")));
        }

        let ranked: Vec<RankedText> = response.json().await.map_err(|e| {
            error!(scorer = SCORER, error = %e, "failed to parse response");
            Self::failure(format!("failed to parse response: {e}"))
        })?;

        align_scores(ranked, pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_realigned_to_request_order() {
        let ranked: Vec<RankedText> = serde_json::from_str(
            r#"[{"index":2,"score":0.9},{"index":0,"score":0.5},{"index":1,"score":0.1}]"#,
        )
        .unwrap();
        assert_eq!(align_scores(ranked, 3).unwrap(), vec![0.5, 0.1, 0.9]);
    }

    #[test]
    fn missing_or_stray_indices_fail() {
        let missing = vec![RankedText { index: 0, score: 1.0 }];
        assert!(align_scores(missing, 2).is_err());

        let stray = vec![RankedText { index: 5, score: 1.0 }];
        assert!(matches!(align_scores(stray, 1), Err(RetrievalError::ScoringBackend { .. })));
    }
}
