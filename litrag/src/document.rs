//! Data types for chunks, parent documents, query variants, and ranked results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to chunks and parent documents (year, doi, section, title, ...).
///
/// A `BTreeMap` keeps serialization order stable across runs.
pub type Metadata = BTreeMap<String, Value>;

/// A short child passage held by the vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: String,
    /// The ID of the [`ParentDocument`] this passage was cut from.
    pub parent_id: String,
    /// The passage text.
    pub text: String,
    /// Metadata inherited from the parent plus chunk-specific fields.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a chunk with empty metadata.
    pub fn new(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A full document stored in the parent store and returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentDocument {
    /// Opaque document identifier.
    pub id: String,
    /// The full document text.
    pub text: String,
    /// Key-value metadata associated with the document.
    #[serde(default)]
    pub metadata: Metadata,
    /// Child passages that matched during the current request. Never persisted.
    #[serde(skip)]
    pub referencing_sentences: Vec<String>,
}

impl ParentDocument {
    /// Create a document with empty metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            referencing_sentences: Vec::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One phrasing of the user's query sent to the vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryVariant {
    /// The query text.
    pub text: String,
    /// Whether this is the caller's query rather than a generated alternative.
    pub is_original: bool,
}

impl QueryVariant {
    /// The caller's own query.
    pub fn original(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_original: true }
    }

    /// A generated alternative phrasing.
    pub fn alternative(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_original: false }
    }
}

/// A reranked [`ParentDocument`].
///
/// Scores are only comparable within the rerank call that produced them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredResult {
    /// The ranked document, with `referencing_sentences` filled in.
    pub document: ParentDocument,
    /// The scorer's relevance score (higher is more relevant).
    pub score: f32,
    /// Zero-based position in the ranking.
    pub rank: usize,
    /// The passages that led to this document, mirrored from the document
    /// so they survive serialization.
    pub referencing_sentences: Vec<String>,
}
