//! Parent document key/value store.
//!
//! Full documents live in a two-column table `(content, id)` where `content`
//! is the JSON-serialized text and metadata of a [`ParentDocument`]. Two
//! backends implement [`ParentStore`]:
//!
//! - [`InMemoryParentStore`] - a `RwLock`-guarded row list, for tests and small corpora
//! - [`SqliteParentStore`] - an `sqlx` SQLite table (feature `sqlite`)
//!
//! Both backends append on duplicate ids; lookups return the earliest row.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::document::{Metadata, ParentDocument};
use crate::error::{Result, RetrievalError};

pub use memory::InMemoryParentStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteParentStore;

/// Rows fetched per page by [`ParentStore::scan`].
pub const SCAN_PAGE_SIZE: usize = 500;

/// A persistent table of parent documents keyed by id.
///
/// Readers may run concurrently from many requests; implementations
/// synchronize internally.
///
/// # Example
///
/// ```rust,ignore
/// use litrag::{InMemoryParentStore, ParentDocument, ParentStore};
///
/// let store = InMemoryParentStore::new("parents")?;
/// store.put_many(&[ParentDocument::new("doc-1", "full text")]).await?;
/// let found = store.get_many(&["doc-1", "missing"]).await?;
/// assert!(found[0].is_some() && found[1].is_none());
/// ```
#[async_trait]
pub trait ParentStore: Send + Sync {
    /// The backing table name.
    fn table_name(&self) -> &str;

    /// Append one row per document, creating the table if it does not exist.
    ///
    /// Existing rows with the same id are left in place.
    async fn put_many(&self, documents: &[ParentDocument]) -> Result<()>;

    /// Look up documents by id in one batched query.
    ///
    /// The output has the same length and order as `ids`; an id with no row
    /// maps to `None`. A store whose table was never created answers `None`
    /// for every id.
    async fn get_many(&self, ids: &[&str]) -> Result<Vec<Option<ParentDocument>>>;

    /// Remove every row whose id is in `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::StoreNotInitialized`] if the table does not exist.
    async fn delete_many(&self, ids: &[&str]) -> Result<()>;

    /// Stream row ids, optionally only those starting with `prefix`.
    ///
    /// Rows are read [`SCAN_PAGE_SIZE`] at a time in insertion order. Each call
    /// starts from the beginning of the table.
    fn scan<'a>(&'a self, prefix: Option<&'a str>) -> BoxStream<'a, Result<String>>;
}

#[derive(Serialize)]
struct ContentRef<'a> {
    text: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct Content {
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

/// Serialize a document's text and metadata into the `content` column.
///
/// `referencing_sentences` is request-scoped and never written.
pub fn encode_document(document: &ParentDocument) -> Result<String> {
    let content = ContentRef { text: &document.text, metadata: &document.metadata };
    Ok(serde_json::to_string(&content)?)
}

/// Rebuild a document from its `id` and `content` columns.
pub fn decode_document(id: &str, content: &str) -> Result<ParentDocument> {
    let Content { text, metadata } = serde_json::from_str(content)?;
    Ok(ParentDocument { id: id.to_string(), text, metadata, referencing_sentences: Vec::new() })
}

/// Sanitize a table name: only ASCII alphanumerics and underscores survive.
pub(crate) fn sanitize_table_name(backend: &str, name: &str) -> Result<String> {
    let sanitized: String =
        name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if sanitized.trim_matches('_').is_empty() {
        return Err(RetrievalError::Store {
            backend: backend.to_string(),
            message: format!("table name '{name}' is empty after sanitization"),
        });
    }
    Ok(sanitized)
}

/// Turn a page fetcher into a lazy id stream.
///
/// `fetch_page(offset)` returns at most [`SCAN_PAGE_SIZE`] ids; a short page
/// ends the stream.
pub(crate) fn paginate<'a, F, Fut>(fetch_page: F) -> BoxStream<'a, Result<String>>
where
    F: FnMut(usize) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Vec<String>>> + Send + 'a,
{
    stream::try_unfold((fetch_page, Some(0usize)), |(mut fetch_page, offset)| async move {
        let Some(offset) = offset else {
            return Ok(None);
        };
        let page = fetch_page(offset).await?;
        if page.is_empty() {
            return Ok(None);
        }
        let next = (page.len() == SCAN_PAGE_SIZE).then_some(offset + SCAN_PAGE_SIZE);
        let ids = stream::iter(page.into_iter().map(Ok::<String, RetrievalError>));
        Ok::<_, RetrievalError>(Some((ids, (fetch_page, next))))
    })
    .try_flatten()
    .boxed()
}
