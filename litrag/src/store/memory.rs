//! In-memory parent store.
//!
//! [`InMemoryParentStore`] keeps serialized rows in a `Vec` behind a
//! `tokio::sync::RwLock`, mirroring the on-disk table: the table does not
//! exist until the first `put_many`, duplicate ids append, and lookups
//! return the earliest row.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::debug;

use super::{
    ParentStore, SCAN_PAGE_SIZE, decode_document, encode_document, paginate, sanitize_table_name,
};
use crate::document::ParentDocument;
use crate::error::{Result, RetrievalError};

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct Row {
    content: String,
    id: String,
}

/// A [`ParentStore`] held entirely in memory.
///
/// # Example
///
/// ```rust,ignore
/// use litrag::{InMemoryParentStore, ParentStore};
///
/// let store = InMemoryParentStore::new("parents")?;
/// store.put_many(&documents).await?;
/// ```
#[derive(Debug)]
pub struct InMemoryParentStore {
    table: String,
    rows: tokio::sync::RwLock<Option<Vec<Row>>>,
}

impl InMemoryParentStore {
    /// Create a store whose table does not exist yet.
    ///
    /// The table name is sanitized the same way as for the SQLite backend.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Store`] if nothing is left of the name after
    /// sanitization.
    pub fn new(table: &str) -> Result<Self> {
        Ok(Self::with_table(sanitize_table_name(BACKEND, table)?))
    }

    fn with_table(table: String) -> Self {
        Self { table, rows: tokio::sync::RwLock::new(None) }
    }

    /// Number of rows, or `None` if the table was never created.
    pub async fn row_count(&self) -> Option<usize> {
        self.rows.read().await.as_ref().map(Vec::len)
    }

    async fn page(&self, prefix: Option<&str>, offset: usize) -> Result<Vec<String>> {
        let rows = self.rows.read().await;
        let Some(rows) = rows.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| prefix.is_none_or(|p| row.id.starts_with(p)))
            .skip(offset)
            .take(SCAN_PAGE_SIZE)
            .map(|row| row.id.clone())
            .collect())
    }
}

impl Default for InMemoryParentStore {
    fn default() -> Self {
        Self::with_table("parent_documents".to_string())
    }
}

#[async_trait]
impl ParentStore for InMemoryParentStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn put_many(&self, documents: &[ParentDocument]) -> Result<()> {
        let encoded = documents
            .iter()
            .map(|doc| -> Result<Row> {
                Ok(Row { content: encode_document(doc)?, id: doc.id.clone() })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rows = self.rows.write().await;
        let table = rows.get_or_insert_with(Vec::new);
        table.extend(encoded);
        debug!(table = %self.table, inserted = documents.len(), "appended parent documents");
        Ok(())
    }

    async fn get_many(&self, ids: &[&str]) -> Result<Vec<Option<ParentDocument>>> {
        let rows = self.rows.read().await;
        let Some(rows) = rows.as_ref() else {
            return Ok(vec![None; ids.len()]);
        };

        let wanted: HashSet<&str> = ids.iter().copied().collect();
        let mut found: HashMap<&str, &str> = HashMap::with_capacity(wanted.len());
        for row in rows {
            if wanted.contains(row.id.as_str()) {
                found.entry(row.id.as_str()).or_insert(row.content.as_str());
            }
        }

        ids.iter()
            .map(|id| found.get(id).map(|content| decode_document(id, content)).transpose())
            .collect()
    }

    async fn delete_many(&self, ids: &[&str]) -> Result<()> {
        let mut rows = self.rows.write().await;
        let table = rows
            .as_mut()
            .ok_or_else(|| RetrievalError::StoreNotInitialized { table: self.table.clone() })?;

        let doomed: HashSet<&str> = ids.iter().copied().collect();
        let before = table.len();
        table.retain(|row| !doomed.contains(row.id.as_str()));
        debug!(table = %self.table, deleted = before - table.len(), "deleted parent documents");
        Ok(())
    }

    fn scan<'a>(&'a self, prefix: Option<&'a str>) -> BoxStream<'a, Result<String>> {
        paginate(move |offset| self.page(prefix, offset))
    }
}
