//! Merging of multi-query search results and child-to-parent resolution.

use std::collections::{HashMap, HashSet};

use crate::document::Chunk;

/// Drop chunks equal on `(id, text)` to an earlier chunk.
///
/// Input order is the concatenation of per-variant result lists in the order
/// the variants were issued; the first occurrence of each pair is kept.
pub fn dedup_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Vec<Chunk> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert((chunk.id.clone(), chunk.text.clone())))
        .collect()
}

/// Parent ids in first-matched order, each with the texts of its matching
/// chunks ("referencing sentences").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentReferences {
    entries: Vec<(String, Vec<String>)>,
    positions: HashMap<String, usize>,
}

impl ParentReferences {
    /// Build the mapping from deduplicated chunks.
    pub fn from_chunks<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Self {
        let mut references = Self::default();
        for chunk in chunks {
            references.push(&chunk.parent_id, chunk.text.clone());
        }
        references
    }

    /// Register `parent_id` without any matching chunk. Existing entries are untouched.
    pub fn ensure(&mut self, parent_id: &str) {
        self.slot(parent_id);
    }

    fn push(&mut self, parent_id: &str, sentence: String) {
        let slot = self.slot(parent_id);
        self.entries[slot].1.push(sentence);
    }

    fn slot(&mut self, parent_id: &str) -> usize {
        if let Some(&slot) = self.positions.get(parent_id) {
            return slot;
        }
        self.entries.push((parent_id.to_string(), Vec::new()));
        let slot = self.entries.len() - 1;
        self.positions.insert(parent_id.to_string(), slot);
        slot
    }

    /// Parent ids in first-matched order.
    pub fn parent_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// The referencing sentences of `parent_id`; empty for unknown ids.
    pub fn sentences(&self, parent_id: &str) -> &[String] {
        match self.positions.get(parent_id) {
            Some(&slot) => &self.entries[slot].1,
            None => &[],
        }
    }

    /// Number of distinct parents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no parent was referenced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ordered `(parent_id, sentences)` pairs.
    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }
}
